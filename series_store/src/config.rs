//! Store configuration: TOML file, environment overrides, validation.
//!
//! ```toml
//! [backend]
//! kind = "sqlite"            # or "file" with `path = "..."`
//! url = "sqlite://series.db"
//!
//! [cache]
//! kind = "memory"            # or "none"
//! ttl_secs = 3600
//! max_entries = 10000
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 50
//!
//! [analysis]
//! offload_threshold = 65536
//! timezone = "UTC"
//! dst_policy = "strict"
//! ```
//!
//! Every section and field is optional. Entrypoints:
//! - [`load_config_str`] / [`load_config_path`]: parse and validate.
//! - [`StoreConfig::apply_env_overrides`]: `SERIES_STORE_FILE`,
//!   `DATABASE_URL`, `CACHE_BACKEND`, `CACHE_TTL_SECONDS`, `RETRY_MAX_ATTEMPTS`.
//! - [`load`]: file (or defaults), then environment, then validation.

use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use shared_utils::{ConfigError, env_opt, env_parse};
use toml::from_str;

use crate::{
    cache::MAX_TTL,
    repo::RetryPolicy,
    tz::{DstPolicy, TimeParser},
};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Which repository backend to use.
    pub backend: BackendConfig,
    /// Cache in front of the repository.
    pub cache: CacheConfig,
    /// Retry of transient storage failures.
    pub retry: RetryPolicy,
    /// Parsing and transform settings.
    pub analysis: AnalysisConfig,
}

/// Repository backend selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// JSON file store.
    File {
        /// Primary file; `<path>.bak` and `<path>.tmp` live next to it.
        path: PathBuf,
    },
    /// SQLite database.
    Sqlite {
        /// `sqlite://path`, `sqlite:path` or a bare path.
        url: String,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::File {
            path: PathBuf::from("series_store.json"),
        }
    }
}

/// Cache backend kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    /// Process-local [`crate::cache::InMemoryCache`].
    #[default]
    Memory,
    /// No caching.
    None,
}

impl FromStr for CacheKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheKind::Memory),
            "none" | "off" => Ok(CacheKind::None),
            other => Err(format!("unknown cache backend {other:?} (expected memory|none)")),
        }
    }
}

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Backend kind.
    pub kind: CacheKind,
    /// Entry lifetime in seconds.
    pub ttl_secs: u64,
    /// Upper bound on in-memory entries; unbounded when absent.
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kind: CacheKind::Memory,
            ttl_secs: 3600,
            max_entries: None,
        }
    }
}

impl CacheConfig {
    /// TTL as a [`Duration`].
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Parsing and transform settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Rows × value columns above which transforms run on the blocking pool.
    pub offload_threshold: usize,
    /// IANA zone for naive timestamps in uploads.
    pub timezone: String,
    /// Handling of ambiguous or skipped local times.
    pub dst_policy: DstPolicy,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            offload_threshold: 65_536,
            timezone: "UTC".to_string(),
            dst_policy: DstPolicy::Strict,
        }
    }
}

impl AnalysisConfig {
    /// Time parser for the configured zone and policy.
    pub fn parser(&self) -> anyhow::Result<TimeParser> {
        TimeParser::for_zone(&self.timezone, self.dst_policy)
    }
}

impl StoreConfig {
    /// Applies environment overrides on top of the current values.
    ///
    /// `DATABASE_URL` wins over `SERIES_STORE_FILE` when both are set.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(path) = env_opt("SERIES_STORE_FILE") {
            self.backend = BackendConfig::File { path: path.into() };
        }
        if let Some(url) = env_opt("DATABASE_URL") {
            self.backend = BackendConfig::Sqlite { url };
        }
        if let Some(kind) = env_parse::<CacheKind>("CACHE_BACKEND")? {
            self.cache.kind = kind;
        }
        if let Some(ttl) = env_parse::<u64>("CACHE_TTL_SECONDS")? {
            self.cache.ttl_secs = ttl;
        }
        if let Some(n) = env_parse::<u32>("RETRY_MAX_ATTEMPTS")? {
            self.retry.max_attempts = n;
        }
        Ok(())
    }

    /// Rejects settings that cannot work.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cache.ttl_secs == 0 {
            bail!("cache.ttl_secs must be positive");
        }
        if self.cache.ttl_secs > MAX_TTL.as_secs() {
            bail!("cache.ttl_secs must be at most {}", MAX_TTL.as_secs());
        }
        if self.cache.max_entries == Some(0) {
            bail!("cache.max_entries must be positive when set");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        self.analysis
            .parser()
            .with_context(|| format!("analysis.timezone {:?}", self.analysis.timezone))?;
        Ok(())
    }
}

/// Parse a configuration TOML string and validate it.
pub fn load_config_str(toml_str: &str) -> anyhow::Result<StoreConfig> {
    let cfg: StoreConfig = from_str(toml_str).context("failed to parse store config TOML")?;
    cfg.validate()?;
    Ok(cfg)
}

/// Read a configuration TOML file from disk, parse and validate it.
pub fn load_config_path(path: impl AsRef<std::path::Path>) -> anyhow::Result<StoreConfig> {
    let text = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("read config file {}", path.as_ref().display()))?;
    load_config_str(&text)
}

/// Loads `path` (or defaults), applies environment overrides, validates.
pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<StoreConfig> {
    let mut cfg = match path {
        Some(p) => load_config_path(p)?,
        None => StoreConfig::default(),
    };
    cfg.apply_env_overrides()?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg = load_config_str("").unwrap();
        assert_eq!(cfg, StoreConfig::default());
        assert_eq!(cfg.cache.ttl(), Duration::from_secs(3600));
        assert_eq!(cfg.retry.max_attempts, 3);
    }

    #[test]
    fn sqlite_backend_and_partial_sections() {
        let cfg = load_config_str(
            r#"
            [backend]
            kind = "sqlite"
            url = "sqlite://data/series.db"

            [cache]
            kind = "none"

            [analysis]
            timezone = "America/New_York"
            dst_policy = "prefer_earliest"
            "#,
        )
        .unwrap();
        assert_eq!(
            cfg.backend,
            BackendConfig::Sqlite {
                url: "sqlite://data/series.db".into()
            }
        );
        assert_eq!(cfg.cache.kind, CacheKind::None);
        assert_eq!(cfg.cache.ttl_secs, 3600);
        assert_eq!(cfg.analysis.dst_policy, DstPolicy::PreferEarliest);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        assert!(load_config_str("[cache]\nttl_secs = 0").is_err());
        assert!(load_config_str("[cache]\nttl_secs = 9223372036854775807").is_err());
        let longest = format!("[cache]\nttl_secs = {}", MAX_TTL.as_secs());
        assert_eq!(load_config_str(&longest).unwrap().cache.ttl(), MAX_TTL);
        assert!(load_config_str("[retry]\nmax_attempts = 0").is_err());
        assert!(load_config_str("[analysis]\ntimezone = \"Mars/Olympus\"").is_err());
        assert!(load_config_str("[cache]\nbogus = 1").is_err());
    }

    #[test]
    fn cache_kind_from_env_text() {
        assert_eq!("Memory".parse::<CacheKind>(), Ok(CacheKind::Memory));
        assert_eq!("off".parse::<CacheKind>(), Ok(CacheKind::None));
        assert!("redis".parse::<CacheKind>().is_err());
    }
}
