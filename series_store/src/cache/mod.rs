//! Key/value cache used in front of a repository.
//!
//! Values are opaque bytes (JSON produced by [`CachedRepo`]) stored under
//! string keys with a TTL. Three keys exist per series:
//! `entity:{id}`, `entity:{id}:time_domain` and `entity:{id}:frequency_domain`.
//!
//! Backends report failures as [`CacheError`]; the decorator swallows them
//! and falls through to the repository.

mod cached_repo;
mod memory;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{CacheConfig, CacheKind};

pub use cached_repo::{CachedRepo, DEFAULT_OFFLOAD_THRESHOLD, DEFAULT_TTL};
pub use memory::{InMemoryCache, MAX_TTL, NoopCache};

/// Failure of a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend could not be reached or refused the operation.
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    /// A cached payload could not be encoded or decoded.
    #[error("cache payload codec error")]
    Codec(#[from] serde_json::Error),
}

/// Minimal key/value contract with per-entry TTL.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Value under `key`, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Stores `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Removes `keys`; returns how many were present.
    async fn delete(&self, keys: &[String]) -> Result<usize, CacheError>;

    /// Removes everything.
    async fn clear(&self) -> Result<(), CacheError>;
}

#[async_trait]
impl<C: CacheBackend + ?Sized> CacheBackend for Arc<C> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        (**self).get(key).await
    }
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        (**self).set(key, value, ttl).await
    }
    async fn delete(&self, keys: &[String]) -> Result<usize, CacheError> {
        (**self).delete(keys).await
    }
    async fn clear(&self) -> Result<(), CacheError> {
        (**self).clear().await
    }
}

/// Key of the cached entity.
pub fn entity_key(id: &str) -> String {
    format!("entity:{id}")
}

/// Key of the cached time-domain view.
pub fn time_domain_key(id: &str) -> String {
    format!("entity:{id}:time_domain")
}

/// Key of the cached frequency-domain view.
pub fn frequency_domain_key(id: &str) -> String {
    format!("entity:{id}:frequency_domain")
}

/// Every key that may hold data for `id`.
pub fn keys_for(id: &str) -> [String; 3] {
    [entity_key(id), time_domain_key(id), frequency_domain_key(id)]
}

/// Builds the backend selected by `config.kind`.
pub fn open_cache(config: &CacheConfig) -> Arc<dyn CacheBackend> {
    match config.kind {
        CacheKind::Memory => Arc::new(InMemoryCache::new(config.max_entries)),
        CacheKind::None => Arc::new(NoopCache),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_the_entity_prefix() {
        assert_eq!(
            keys_for("42"),
            [
                "entity:42".to_string(),
                "entity:42:time_domain".to_string(),
                "entity:42:frequency_domain".to_string()
            ]
        );
    }
}
