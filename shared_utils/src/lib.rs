//! Small helpers shared across the workspace crates.

pub mod env;

pub use env::{ConfigError, env_opt, env_parse};
