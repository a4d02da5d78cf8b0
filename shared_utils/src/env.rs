use std::str::FromStr;

use thiserror::Error;

/// Errors related to application configuration read from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable is set but its value cannot be parsed.
    #[error("Invalid value for environment variable {name}: {value:?} ({reason})")]
    InvalidEnvVar {
        /// Variable name.
        name: String,
        /// Raw value as found in the environment.
        value: String,
        /// Parser message.
        reason: String,
    },
}

/// Reads an optional environment variable. Unset and blank values are `None`.
pub fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Reads and parses an optional environment variable.
///
/// Returns `Ok(None)` when the variable is unset, and
/// [`ConfigError::InvalidEnvVar`] when it is set but does not parse as `T`.
pub fn env_parse<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                name: name.to_string(),
                value: raw,
                reason: e.to_string(),
            }),
    }
}
