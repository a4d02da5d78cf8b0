//! File-backed repository.
//!
//! The corpus lives in memory as an ordered map id → entity and is written to
//! a single JSON file after every mutation:
//!
//! 1. serialize the whole map into `<file>.tmp` and `fsync` it;
//! 2. copy the current `<file>` to `<file>.bak`;
//! 3. rename `<file>.tmp` over `<file>`.
//!
//! The primary file is never overwritten in place. If the write fails the
//! in-memory change is rolled back, so memory and disk never disagree. On
//! open, a primary that cannot be parsed is replaced by the backup.
//!
//! Known constraint: one process, one writer. Writers in different processes
//! are not coordinated and the last rename wins.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt, sync::RwLock};
use tracing::{debug, info, warn};

use super::{RetryPolicy, TimeSeriesRepo, new_id};
use crate::{
    error::{Error, Result, StorageError},
    model::{ColumnValues, TimeSeries, TimeValue},
};

/// On-disk form of one series: metadata plus row data.
#[derive(Debug, Serialize, Deserialize)]
struct StoredSeries {
    id: String,
    name: Option<String>,
    description: Option<String>,
    time_column: String,
    value_columns: Vec<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    rows: Vec<StoredRow>,
}

/// One row: the time value and one entry per value column.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRow {
    time: TimeValue,
    values: Vec<Option<f64>>,
}

impl StoredSeries {
    fn from_entity(id: &str, series: &TimeSeries) -> Self {
        Self {
            id: id.to_string(),
            name: series.name().map(str::to_owned),
            description: series.description().map(str::to_owned),
            time_column: series.time_column().to_string(),
            value_columns: series.value_columns().to_vec(),
            created_at: series.created_at(),
            updated_at: series.updated_at(),
            rows: series
                .rows()
                .map(|r| StoredRow {
                    time: r.time.clone(),
                    values: r.values,
                })
                .collect(),
        }
    }

    fn into_entity(self) -> std::result::Result<TimeSeries, StorageError> {
        let id = self.id;
        let corrupt = |what: String| StorageError::Corrupt(format!("series {id}: {what}"));

        let mut time = Vec::with_capacity(self.rows.len());
        let mut values: ColumnValues = self
            .value_columns
            .iter()
            .map(|c| (c.clone(), Vec::with_capacity(self.rows.len())))
            .collect();
        for (i, row) in self.rows.into_iter().enumerate() {
            if row.values.len() != self.value_columns.len() {
                return Err(corrupt(format!(
                    "row {i} has {} values, expected {}",
                    row.values.len(),
                    self.value_columns.len()
                )));
            }
            time.push(row.time);
            for (seq, v) in values.values_mut().zip(row.values) {
                seq.push(v);
            }
        }

        let series = TimeSeries::from_parts(self.time_column, self.value_columns, time, values)
            .map_err(|e| corrupt(e.to_string()))?;
        Ok(series.restore_metadata(
            id,
            self.name,
            self.description,
            self.created_at,
            self.updated_at,
        ))
    }
}

type Corpus = IndexMap<String, TimeSeries>;

/// Repository that keeps every series in one JSON file.
#[derive(Debug)]
pub struct FileRepo {
    path: PathBuf,
    retry: RetryPolicy,
    corpus: RwLock<Corpus>,
}

/// `<path><suffix>`, e.g. `store.json` → `store.json.bak`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Removes the temp file unless disarmed after a successful rename.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

async fn read_corpus(path: &Path) -> std::result::Result<Option<Corpus>, StorageError> {
    let bytes = match fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io(path, e)),
    };
    let doc: IndexMap<String, StoredSeries> = serde_json::from_slice(&bytes)?;
    let mut corpus = Corpus::with_capacity(doc.len());
    for (id, stored) in doc {
        if stored.id != id {
            return Err(StorageError::Corrupt(format!(
                "entry {id} carries id {}",
                stored.id
            )));
        }
        corpus.insert(id, stored.into_entity()?);
    }
    Ok(Some(corpus))
}

impl FileRepo {
    /// Opens (or prepares to create) the store at `path`.
    ///
    /// A missing file is an empty store. If the file exists but cannot be
    /// read or parsed, `<path>.bak` is tried before giving up.
    pub async fn open(path: impl Into<PathBuf>, retry: RetryPolicy) -> Result<Self> {
        let path = path.into();
        let corpus = match read_corpus(&path).await {
            Ok(Some(c)) => c,
            Ok(None) => Corpus::new(),
            Err(primary) => {
                let backup = sibling(&path, ".bak");
                warn!(path = %path.display(), error = %primary, "store file unreadable, trying backup");
                match read_corpus(&backup).await {
                    Ok(Some(c)) => c,
                    Ok(None) | Err(_) => return Err(primary.into()),
                }
            }
        };
        info!(path = %path.display(), series = corpus.len(), "file repository opened");
        Ok(Self {
            path,
            retry,
            corpus: RwLock::new(corpus),
        })
    }

    /// Location of the primary file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location of the backup file kept from the previous write.
    pub fn backup_path(&self) -> PathBuf {
        sibling(&self.path, ".bak")
    }

    async fn write_atomic(&self, bytes: &[u8]) -> std::result::Result<(), StorageError> {
        let tmp = sibling(&self.path, ".tmp");
        let mut guard = TempFileGuard::new(tmp.clone());

        {
            let mut file = fs::File::create(&tmp)
                .await
                .map_err(|e| StorageError::io(&tmp, e))?;
            file.write_all(bytes)
                .await
                .map_err(|e| StorageError::io(&tmp, e))?;
            file.sync_all()
                .await
                .map_err(|e| StorageError::io(&tmp, e))?;
        }

        if fs::try_exists(&self.path)
            .await
            .map_err(|e| StorageError::io(&self.path, e))?
        {
            let backup = self.backup_path();
            fs::copy(&self.path, &backup)
                .await
                .map_err(|e| StorageError::io(&backup, e))?;
        }

        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StorageError::io(&self.path, e))?;
        guard.disarm();
        Ok(())
    }

    async fn persist(&self, corpus: &Corpus) -> Result<()> {
        let doc: IndexMap<&str, StoredSeries> = corpus
            .iter()
            .map(|(id, s)| (id.as_str(), StoredSeries::from_entity(id, s)))
            .collect();
        let encoded = serde_json::to_vec(&doc).map_err(StorageError::from)?;
        let bytes = encoded.as_slice();
        self.retry
            .run("file.persist", move || async move {
                self.write_atomic(bytes).await.map_err(Error::from)
            })
            .await
    }
}

#[async_trait]
impl TimeSeriesRepo for FileRepo {
    async fn save(&self, mut series: TimeSeries) -> Result<TimeSeries> {
        let id = series.id().map(str::to_owned).unwrap_or_else(new_id);
        let mut corpus = self.corpus.write().await;

        let now = Utc::now();
        let created = corpus
            .get(&id)
            .and_then(TimeSeries::created_at)
            .unwrap_or(now);
        series.stamp(id.clone(), created, now);

        let previous = corpus.insert(id.clone(), series.clone());
        if let Err(e) = self.persist(&corpus).await {
            match previous {
                Some(p) => {
                    corpus.insert(id, p);
                }
                None => {
                    corpus.shift_remove(&id);
                }
            }
            return Err(e);
        }

        info!(id = %id, rows = series.len(), "saved time series");
        Ok(series)
    }

    async fn find_by_id(&self, id: &str) -> Result<TimeSeries> {
        let corpus = self.corpus.read().await;
        match corpus.get(id) {
            Some(s) => Ok(s.clone()),
            None => {
                debug!(id, "time series not found");
                Err(Error::not_found(id))
            }
        }
    }

    async fn find_all(&self) -> Result<Vec<TimeSeries>> {
        let corpus = self.corpus.read().await;
        let mut all: Vec<TimeSeries> = corpus.values().cloned().collect();
        all.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(&b.id()))
        });
        Ok(all)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut corpus = self.corpus.write().await;
        let Some((index, key, removed)) = corpus.shift_remove_full(id) else {
            debug!(id, "delete of unknown time series");
            return Err(Error::not_found(id));
        };
        if let Err(e) = self.persist(&corpus).await {
            corpus.shift_insert(index, key, removed);
            return Err(e);
        }
        info!(id, "deleted time series");
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.corpus.read().await.contains_key(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawTable;
    use tempfile::TempDir;

    fn sample(values: &[&str]) -> TimeSeries {
        let rows = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                vec![
                    Some(format!("2024-01-{:02}", i + 1)),
                    (!v.is_empty()).then(|| v.to_string()),
                ]
            })
            .collect();
        let raw = RawTable::new(vec!["date".into(), "v".into()], rows);
        TimeSeries::from_table(&raw, "date", &["v".to_string()]).unwrap()
    }

    #[test]
    fn sibling_appends_suffix() {
        assert_eq!(
            sibling(Path::new("/a/store.json"), ".bak"),
            PathBuf::from("/a/store.json.bak")
        );
    }

    #[tokio::test]
    async fn save_reopen_and_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");

        let repo = FileRepo::open(&path, RetryPolicy::none()).await.unwrap();
        let first = repo.save(sample(&["1", "2"])).await.unwrap();
        let id = first.id().unwrap().to_string();
        assert!(!repo.backup_path().exists(), "no backup before the second write");

        repo.save(sample(&["3", "", "5"]).with_id(&id)).await.unwrap();
        assert!(repo.backup_path().exists());
        assert!(!sibling(&path, ".tmp").exists());

        let reopened = FileRepo::open(&path, RetryPolicy::none()).await.unwrap();
        let got = reopened.find_by_id(&id).await.unwrap();
        assert_eq!(got.column("v").unwrap(), &[Some(3.0), None, Some(5.0)]);
        assert_eq!(got.created_at(), first.created_at());
    }

    #[tokio::test]
    async fn corrupt_primary_falls_back_to_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");

        let repo = FileRepo::open(&path, RetryPolicy::none()).await.unwrap();
        let saved = repo.save(sample(&["1"]).with_id("keep")).await.unwrap();
        repo.save(sample(&["2"]).with_id("other")).await.unwrap();
        drop(repo);

        std::fs::write(&path, b"{ not json").unwrap();
        let reopened = FileRepo::open(&path, RetryPolicy::none()).await.unwrap();
        assert_eq!(reopened.find_by_id("keep").await.unwrap(), saved);
        assert!(!reopened.exists("other").await.unwrap());
    }

    #[tokio::test]
    async fn failed_write_rolls_back_memory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing-dir").join("store.json");

        let repo = FileRepo::open(&path, RetryPolicy::none()).await.unwrap();
        let err = repo.save(sample(&["1"]).with_id("x")).await.unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::Io { .. })));
        assert!(!repo.exists("x").await.unwrap());
    }
}
