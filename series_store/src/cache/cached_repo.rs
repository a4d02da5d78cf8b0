//! Read-through cache in front of any [`TimeSeriesRepo`].
//!
//! Reads look up the key, and on a miss compute the value (repository load
//! or transform), store it with the TTL and return it. Writes mutate the
//! repository first and then evict every key of the id.
//!
//! A reader that started before a write could otherwise put the old value
//! back after the eviction. The decorator therefore keeps a single write
//! epoch, bumped by every write before it evicts. A reader records the epoch
//! before loading and stores its result only if the epoch is unchanged,
//! checking once more after the store and evicting if a write slipped in.
//! A write to another id costs a concurrent reader its store, nothing more.
//!
//! Every [`CacheError`] is logged and treated as a miss (reads) or ignored
//! (writes): a cache outage never fails a request.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use super::{CacheBackend, frequency_domain_key, entity_key, keys_for, time_domain_key};
use crate::{
    error::{Error, Result, StorageError},
    model::TimeSeries,
    repo::TimeSeriesRepo,
    transform::{FrequencyDomain, TimeDomain},
};

/// Default TTL for cache entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Default number of samples above which transforms leave the async runtime.
pub const DEFAULT_OFFLOAD_THRESHOLD: usize = 65_536;

/// Cache decorator over a repository.
pub struct CachedRepo<R> {
    inner: R,
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
    offload_threshold: usize,
    epoch: AtomicU64,
}

impl<R> std::fmt::Debug for CachedRepo<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedRepo")
            .field("ttl", &self.ttl)
            .field("offload_threshold", &self.offload_threshold)
            .finish_non_exhaustive()
    }
}

impl<R: TimeSeriesRepo> CachedRepo<R> {
    /// Wraps `inner` with `cache`; entries live for `ttl`.
    pub fn new(inner: R, cache: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            inner,
            cache,
            ttl,
            offload_threshold: DEFAULT_OFFLOAD_THRESHOLD,
            epoch: AtomicU64::new(0),
        }
    }

    /// Sets the sample count (rows × value columns) above which derived views
    /// are computed on the blocking pool.
    pub fn with_offload_threshold(mut self, samples: usize) -> Self {
        self.offload_threshold = samples;
        self
    }

    /// The wrapped repository.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// The cache backend.
    pub fn cache(&self) -> &Arc<dyn CacheBackend> {
        &self.cache
    }

    /// Time-domain view of series `id`, cached under `entity:{id}:time_domain`.
    pub async fn get_time_domain_data(&self, id: &str) -> Result<TimeDomain> {
        let key = time_domain_key(id);
        let generation = self.generation();
        if let Some(td) = self.lookup::<TimeDomain>(&key).await {
            return Ok(td);
        }
        let series = self.find_by_id(id).await?;
        let td = self.compute(series, |s| s.get_time_domain_data()).await?;
        self.store(&key, &td, generation).await;
        Ok(td)
    }

    /// Frequency-domain view of series `id`, cached under
    /// `entity:{id}:frequency_domain`.
    pub async fn get_frequency_domain_data(&self, id: &str) -> Result<FrequencyDomain> {
        let key = frequency_domain_key(id);
        let generation = self.generation();
        if let Some(fd) = self.lookup::<FrequencyDomain>(&key).await {
            return Ok(fd);
        }
        let series = self.find_by_id(id).await?;
        let fd = self
            .compute(series, |s| s.get_frequency_domain_data())
            .await?;
        self.store(&key, &fd, generation).await;
        Ok(fd)
    }

    /// Evicts every key of `id` without touching the repository; returns the
    /// number of keys that were present.
    pub async fn invalidate(&self, id: &str) -> usize {
        self.bump();
        self.evict(id).await
    }

    /// Frequency-domain view of an already loaded `series`, bypassing the
    /// cache so the view matches the version the caller holds.
    pub async fn frequency_domain_of(&self, series: &TimeSeries) -> Result<FrequencyDomain> {
        self.compute(series.clone(), |s| s.get_frequency_domain_data())
            .await
    }

    fn generation(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    async fn evict(&self, id: &str) -> usize {
        match self.cache.delete(&keys_for(id)).await {
            Ok(n) => n,
            Err(e) => {
                warn!(id, error = %e, "cache eviction failed; entries expire by TTL");
                0
            }
        }
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.cache.get(key).await {
            Ok(Some(b)) => b,
            Ok(None) => {
                debug!(key, "cache miss");
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "cache read failed, falling through");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(v) => {
                debug!(key, "cache hit");
                Some(v)
            }
            Err(e) => {
                warn!(key, error = %e, "undecodable cache entry, evicting");
                if let Err(e) = self.cache.delete(&[key.to_string()]).await {
                    warn!(key, error = %e, "cache eviction failed");
                }
                None
            }
        }
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T, generation: u64) {
        if self.generation() != generation {
            debug!(key, "series changed while loading, not caching");
            return;
        }
        let bytes = match serde_json::to_vec(value) {
            Ok(b) => b,
            Err(e) => {
                warn!(key, error = %e, "cache encode failed");
                return;
            }
        };
        if let Err(e) = self.cache.set(key, bytes, self.ttl).await {
            warn!(key, error = %e, "cache write failed");
            return;
        }
        if self.generation() != generation {
            debug!(key, "series changed while caching, evicting");
            if let Err(e) = self.cache.delete(&[key.to_string()]).await {
                warn!(key, error = %e, "cache eviction failed");
            }
        }
    }

    async fn compute<T, F>(&self, series: TimeSeries, f: F) -> Result<T>
    where
        F: FnOnce(&TimeSeries) -> T + Send + 'static,
        T: Send + 'static,
    {
        let samples = series.len() * series.value_columns().len();
        if samples > self.offload_threshold {
            debug!(samples, "computing view on the blocking pool");
            tokio::task::spawn_blocking(move || f(&series))
                .await
                .map_err(|e| Error::from(StorageError::from(e)))
        } else {
            Ok(f(&series))
        }
    }
}

#[async_trait]
impl<R: TimeSeriesRepo> TimeSeriesRepo for CachedRepo<R> {
    async fn save(&self, series: TimeSeries) -> Result<TimeSeries> {
        let saved = self.inner.save(series).await?;
        if let Some(id) = saved.id() {
            self.bump();
            self.evict(id).await;
        }
        Ok(saved)
    }

    async fn find_by_id(&self, id: &str) -> Result<TimeSeries> {
        let key = entity_key(id);
        let generation = self.generation();
        if let Some(series) = self.lookup::<TimeSeries>(&key).await {
            return Ok(series);
        }
        let series = self.inner.find_by_id(id).await?;
        self.store(&key, &series, generation).await;
        Ok(series)
    }

    async fn find_all(&self) -> Result<Vec<TimeSeries>> {
        self.inner.find_all().await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.inner.delete(id).await?;
        self.bump();
        self.evict(id).await;
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        self.inner.exists(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::InMemoryCache,
        model::{ColumnValues, TimeValue},
        repo::{FileRepo, RetryPolicy},
    };
    use tempfile::TempDir;

    fn tiny() -> TimeSeries {
        let mut values = ColumnValues::new();
        values.insert("v".to_string(), vec![Some(1.0), Some(2.0)]);
        TimeSeries::from_parts(
            "t".to_string(),
            vec!["v".to_string()],
            vec![TimeValue::Number(0.0), TimeValue::Number(1.0)],
            values,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn write_tracking_does_not_grow_with_ids() {
        let dir = TempDir::new().unwrap();
        let repo = FileRepo::open(dir.path().join("store.json"), RetryPolicy::none())
            .await
            .unwrap();
        let cache = Arc::new(InMemoryCache::new(None));
        let cached = CachedRepo::new(repo, cache.clone(), DEFAULT_TTL);

        for _ in 0..500 {
            let id = cached.save(tiny()).await.unwrap().id().unwrap().to_string();
            cached.find_by_id(&id).await.unwrap();
            cached.delete(&id).await.unwrap();
        }

        assert_eq!(cached.generation(), 1000);
        assert!(cache.is_empty());
    }
}
