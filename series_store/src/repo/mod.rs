//! Persistence of [`TimeSeries`] entities.
//!
//! [`TimeSeriesRepo`] is the contract shared by every backend:
//! - [`FileRepo`]: the whole corpus as one JSON file, rewritten atomically on
//!   every mutation with the previous file kept as a backup.
//! - [`SqliteRepo`]: metadata and data-point tables, replace-on-save inside a
//!   single transaction, cascading delete.
//!
//! Both backends share the same semantics: `save` assigns an id when the
//! entity has none, fully replaces any prior data stored under that id, and
//! stamps `created_at` (first save only) and `updated_at`. `find_all` orders
//! by creation time. `find_by_id` and `delete` report unknown ids as
//! [`Error::NotFound`](crate::error::Error::NotFound).
//!
//! Backends are selected at runtime with [`open_repository`] and handed to
//! callers as `Box<dyn TimeSeriesRepo>`; nothing is global.

mod file;
mod retry;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::{
    config::{BackendConfig, StoreConfig},
    error::Result,
    model::TimeSeries,
};

pub use file::FileRepo;
pub use retry::RetryPolicy;
pub use sqlite::SqliteRepo;

/// Storage contract for time series.
#[async_trait]
pub trait TimeSeriesRepo: Send + Sync {
    /// Persists `series`, replacing anything stored under its id, and returns
    /// the stored entity with id and timestamps populated.
    async fn save(&self, series: TimeSeries) -> Result<TimeSeries>;

    /// Loads one series.
    async fn find_by_id(&self, id: &str) -> Result<TimeSeries>;

    /// Loads every series, oldest first.
    async fn find_all(&self) -> Result<Vec<TimeSeries>>;

    /// Removes one series and all of its data.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Whether a series is stored under `id`.
    async fn exists(&self, id: &str) -> Result<bool>;
}

#[async_trait]
impl<R: TimeSeriesRepo + ?Sized> TimeSeriesRepo for Box<R> {
    async fn save(&self, series: TimeSeries) -> Result<TimeSeries> {
        (**self).save(series).await
    }
    async fn find_by_id(&self, id: &str) -> Result<TimeSeries> {
        (**self).find_by_id(id).await
    }
    async fn find_all(&self) -> Result<Vec<TimeSeries>> {
        (**self).find_all().await
    }
    async fn delete(&self, id: &str) -> Result<()> {
        (**self).delete(id).await
    }
    async fn exists(&self, id: &str) -> Result<bool> {
        (**self).exists(id).await
    }
}

#[async_trait]
impl<R: TimeSeriesRepo + ?Sized> TimeSeriesRepo for Arc<R> {
    async fn save(&self, series: TimeSeries) -> Result<TimeSeries> {
        (**self).save(series).await
    }
    async fn find_by_id(&self, id: &str) -> Result<TimeSeries> {
        (**self).find_by_id(id).await
    }
    async fn find_all(&self) -> Result<Vec<TimeSeries>> {
        (**self).find_all().await
    }
    async fn delete(&self, id: &str) -> Result<()> {
        (**self).delete(id).await
    }
    async fn exists(&self, id: &str) -> Result<bool> {
        (**self).exists(id).await
    }
}

/// Generates a fresh series id.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Build and return the repository backend named by `config.backend`.
///
/// The SQLite backend runs pending migrations before it is returned.
pub async fn open_repository(config: &StoreConfig) -> Result<Box<dyn TimeSeriesRepo>> {
    match &config.backend {
        BackendConfig::File { path } => {
            info!(path = %path.display(), "opening file repository");
            let repo = FileRepo::open(path.clone(), config.retry).await?;
            Ok(Box::new(repo))
        }
        BackendConfig::Sqlite { url } => {
            info!(url = %url, "opening sqlite repository");
            let repo = SqliteRepo::open(url, config.retry).await?;
            Ok(Box::new(repo))
        }
    }
}
