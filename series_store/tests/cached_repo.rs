mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use series_store::cache::{
    CacheBackend, CacheError, CachedRepo, InMemoryCache, entity_key, frequency_domain_key,
    time_domain_key,
};
use series_store::preprocess::FillMethod;
use series_store::repo::{FileRepo, RetryPolicy, TimeSeriesRepo};
use series_store::{Result, TimeSeries, ValidationError};
use tempfile::TempDir;
use tokio::sync::Notify;

const TTL: Duration = Duration::from_secs(60);

/// Counts loads that reach the backing repository.
struct Counting<R> {
    inner: R,
    loads: AtomicUsize,
}

impl<R> Counting<R> {
    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R: TimeSeriesRepo> TimeSeriesRepo for Counting<R> {
    async fn save(&self, series: TimeSeries) -> Result<TimeSeries> {
        self.inner.save(series).await
    }
    async fn find_by_id(&self, id: &str) -> Result<TimeSeries> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.find_by_id(id).await
    }
    async fn find_all(&self) -> Result<Vec<TimeSeries>> {
        self.inner.find_all().await
    }
    async fn delete(&self, id: &str) -> Result<()> {
        self.inner.delete(id).await
    }
    async fn exists(&self, id: &str) -> Result<bool> {
        self.inner.exists(id).await
    }
}

/// Holds one armed `find_by_id` after it has loaded, until released.
struct Gated<R> {
    inner: R,
    armed: AtomicBool,
    parked: Notify,
    release: Notify,
}

#[async_trait]
impl<R: TimeSeriesRepo> TimeSeriesRepo for Gated<R> {
    async fn save(&self, series: TimeSeries) -> Result<TimeSeries> {
        self.inner.save(series).await
    }
    async fn find_by_id(&self, id: &str) -> Result<TimeSeries> {
        let found = self.inner.find_by_id(id).await;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.parked.notify_one();
            self.release.notified().await;
        }
        found
    }
    async fn find_all(&self) -> Result<Vec<TimeSeries>> {
        self.inner.find_all().await
    }
    async fn delete(&self, id: &str) -> Result<()> {
        self.inner.delete(id).await
    }
    async fn exists(&self, id: &str) -> Result<bool> {
        self.inner.exists(id).await
    }
}

/// Backend that fails every call.
struct Down;

#[async_trait]
impl CacheBackend for Down {
    async fn get(&self, _key: &str) -> std::result::Result<Option<Vec<u8>>, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
    async fn set(
        &self,
        _key: &str,
        _value: Vec<u8>,
        _ttl: Duration,
    ) -> std::result::Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
    async fn delete(&self, _keys: &[String]) -> std::result::Result<usize, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
    async fn clear(&self) -> std::result::Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
}

async fn setup(
    dir: &TempDir,
    cache: Arc<dyn CacheBackend>,
) -> CachedRepo<Counting<FileRepo>> {
    let inner = FileRepo::open(dir.path().join("store.json"), RetryPolicy::none())
        .await
        .unwrap();
    CachedRepo::new(
        Counting {
            inner,
            loads: AtomicUsize::new(0),
        },
        cache,
        TTL,
    )
}

#[tokio::test]
async fn reads_are_served_from_cache_until_a_write() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(InMemoryCache::new(None));
    let repo = setup(&dir, cache.clone()).await;

    let saved = repo.save(common::hourly()).await.unwrap();
    let id = saved.id().unwrap().to_string();

    assert_eq!(repo.find_by_id(&id).await.unwrap(), saved);
    assert_eq!(repo.find_by_id(&id).await.unwrap(), saved);
    assert_eq!(repo.inner().loads(), 1);
    assert!(cache.get(&entity_key(&id)).await.unwrap().is_some());

    let updated = repo
        .save(common::numeric(6).with_id(id.clone()))
        .await
        .unwrap();
    assert!(cache.get(&entity_key(&id)).await.unwrap().is_none());

    let found = repo.find_by_id(&id).await.unwrap();
    assert_eq!(found, updated);
    assert_eq!(found.value_columns(), ["v"]);
    assert_eq!(repo.inner().loads(), 2);
}

#[tokio::test]
async fn derived_views_are_cached_and_evicted_together() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(InMemoryCache::new(None));
    let repo = setup(&dir, cache.clone()).await;

    let saved = repo.save(common::hourly()).await.unwrap();
    let id = saved.id().unwrap().to_string();

    let td = repo.get_time_domain_data(&id).await.unwrap();
    let fd = repo.get_frequency_domain_data(&id).await.unwrap();
    assert_eq!(td, saved.get_time_domain_data());
    assert_eq!(fd, saved.get_frequency_domain_data());
    assert_eq!(repo.get_frequency_domain_data(&id).await.unwrap(), fd);
    // the entity was loaded once; both views came from it or the cache
    assert_eq!(repo.inner().loads(), 1);
    assert_eq!(cache.len(), 3);

    assert_eq!(repo.invalidate(&id).await, 3);
    assert!(cache.is_empty());
    assert_eq!(repo.invalidate(&id).await, 0);

    repo.get_time_domain_data(&id).await.unwrap();
    assert!(cache.get(&time_domain_key(&id)).await.unwrap().is_some());
    repo.delete(&id).await.unwrap();
    assert!(cache.get(&time_domain_key(&id)).await.unwrap().is_none());
    assert!(cache.get(&frequency_domain_key(&id)).await.unwrap().is_none());
    assert!(repo.get_time_domain_data(&id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn cache_outage_falls_through_to_the_repository() {
    let dir = TempDir::new().unwrap();
    let repo = setup(&dir, Arc::new(Down)).await;

    let saved = repo.save(common::hourly()).await.unwrap();
    let id = saved.id().unwrap().to_string();

    assert_eq!(repo.find_by_id(&id).await.unwrap(), saved);
    assert_eq!(repo.find_by_id(&id).await.unwrap(), saved);
    assert_eq!(repo.inner().loads(), 2);
    assert_eq!(
        repo.get_frequency_domain_data(&id).await.unwrap(),
        saved.get_frequency_domain_data()
    );
    assert_eq!(repo.invalidate(&id).await, 0);
    repo.delete(&id).await.unwrap();
    assert!(!repo.exists(&id).await.unwrap());
}

#[tokio::test]
async fn undecodable_entries_are_misses() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(InMemoryCache::new(None));
    let repo = setup(&dir, cache.clone()).await;

    let saved = repo.save(common::hourly()).await.unwrap();
    let id = saved.id().unwrap().to_string();
    cache
        .set(&entity_key(&id), b"not json".to_vec(), TTL)
        .await
        .unwrap();

    assert_eq!(repo.find_by_id(&id).await.unwrap(), saved);
    assert_eq!(repo.inner().loads(), 1);
    // repopulated with a valid entry
    assert_eq!(repo.find_by_id(&id).await.unwrap(), saved);
    assert_eq!(repo.inner().loads(), 1);
}

#[tokio::test]
async fn large_series_views_match_inline_computation() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(InMemoryCache::new(None));
    let repo = setup(&dir, cache).await.with_offload_threshold(64);

    let saved = repo.save(common::numeric(512)).await.unwrap();
    let id = saved.id().unwrap();
    let fd = repo.get_frequency_domain_data(id).await.unwrap();
    assert_eq!(fd.bins("v"), Some(257));
    assert_eq!(fd, saved.get_frequency_domain_data());
}

#[tokio::test]
async fn reader_overtaken_by_a_write_does_not_repopulate() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(InMemoryCache::new(None));
    let inner = FileRepo::open(dir.path().join("store.json"), RetryPolicy::none())
        .await
        .unwrap();
    let gated = Gated {
        inner,
        armed: AtomicBool::new(false),
        parked: Notify::new(),
        release: Notify::new(),
    };
    let repo = Arc::new(CachedRepo::new(gated, cache.clone(), TTL));

    let old = repo.save(common::hourly()).await.unwrap();
    let id = old.id().unwrap().to_string();
    repo.inner().armed.store(true, Ordering::SeqCst);

    let reader = tokio::spawn({
        let repo = repo.clone();
        let id = id.clone();
        async move { repo.find_by_id(&id).await }
    });
    repo.inner().parked.notified().await;

    let new = repo
        .save(common::numeric(6).with_id(id.clone()))
        .await
        .unwrap();
    repo.inner().release.notify_one();

    // the reader still answers with what it loaded, but must not cache it
    assert_eq!(reader.await.unwrap().unwrap(), old);
    assert!(cache.get(&entity_key(&id)).await.unwrap().is_none());

    assert_eq!(repo.find_by_id(&id).await.unwrap(), new);
    assert_eq!(repo.find_by_id(&id).await.unwrap(), new);
    assert!(cache.get(&entity_key(&id)).await.unwrap().is_some());
}

#[tokio::test]
async fn cache_hits_match_the_miss_that_filled_them() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(InMemoryCache::new(None));
    let repo = setup(&dir, cache.clone()).await;

    let err = common::hourly()
        .fill_missing(None, FillMethod::Constant(f64::INFINITY), None)
        .unwrap_err();
    assert!(matches!(err, ValidationError::NonFiniteValue { row: 1, .. }));

    let filled = common::hourly()
        .fill_missing(None, FillMethod::Constant(-0.25), None)
        .unwrap();
    let id = repo.save(filled).await.unwrap().id().unwrap().to_string();

    let miss = repo.find_by_id(&id).await.unwrap();
    let hit = repo.find_by_id(&id).await.unwrap();
    assert_eq!(repo.inner().loads(), 1);
    assert_eq!(hit, miss);
    assert_eq!(hit.column("load").unwrap()[1], Some(-0.25));
}
