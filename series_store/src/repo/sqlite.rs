//! Database-backed repository (SQLite via diesel).
//!
//! Layout: one `time_series_metadata` row per series, one
//! `time_series_data_points` row per (time value, value column). Points are
//! inserted row-major, so ordering by their synthetic key and grouping by
//! column restores the original row order.
//!
//! - `save` runs `BEGIN IMMEDIATE`: read the existing `created_at`, update or
//!   insert the metadata row, delete the old points, bulk-insert the new
//!   ones, commit. Any failure rolls the whole unit back.
//! - `find_by_id`/`find_all` load metadata and points inside one read
//!   transaction.
//! - `delete` removes the metadata row; points go with it through
//!   `ON DELETE CASCADE`.
//!
//! diesel is synchronous, so every call runs on the blocking pool with the
//! shared connection. Concurrent saves to the same id are each atomic but
//! not version-checked: the last commit wins.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use diesel::{SqliteConnection, prelude::*};
use indexmap::IndexMap;
use tracing::{debug, info};

use super::{RetryPolicy, TimeSeriesRepo, new_id};
use crate::{
    db::{connection::connect_sqlite, migrate},
    error::{Error, Result, StorageError},
    model::{ColumnValues, TimeSeries, TimeValue},
    models::{DataPointRow, MetadataChangeset, MetadataRow, NewDataPoint, NewMetadata},
    schema::{time_series_data_points as dp, time_series_metadata as m},
    tz,
};

/// Rows per multi-row INSERT; 4 binds each keeps well under SQLite's
/// historical 999-variable limit.
const INSERT_CHUNK: usize = 200;

/// Repository backed by a SQLite database.
#[derive(Clone)]
pub struct SqliteRepo {
    conn: Arc<Mutex<SqliteConnection>>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for SqliteRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRepo")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl SqliteRepo {
    /// Applies pending migrations, then connects.
    pub async fn open(database_url: &str, retry: RetryPolicy) -> Result<Self> {
        let url = database_url.to_string();
        tokio::task::spawn_blocking(move || migrate::run_sqlite(&url))
            .await
            .map_err(StorageError::from)?
            .map_err(|e| StorageError::Migration(format!("{e:#}")))?;
        Self::connect(database_url, retry).await
    }

    /// Connects to an already migrated database.
    pub async fn connect(database_url: &str, retry: RetryPolicy) -> Result<Self> {
        let url = database_url.to_string();
        let conn = tokio::task::spawn_blocking(move || connect_sqlite(&url))
            .await
            .map_err(StorageError::from)??;
        Ok(Self::from_connection(conn, retry))
    }

    /// Wraps a connection that already has the schema and PRAGMAs applied.
    pub fn from_connection(conn: SqliteConnection, retry: RetryPolicy) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            retry,
        }
    }

    /// Runs `f` with the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await
        .map_err(StorageError::from)?
    }
}

fn corrupt(id: &str, what: impl std::fmt::Display) -> Error {
    StorageError::Corrupt(format!("series {id}: {what}")).into()
}

fn parse_stamp(id: &str, s: &str) -> Result<DateTime<Utc>> {
    tz::parse_ts_to_utc(s).map_err(|e| corrupt(id, format!("{e:#}")))
}

/// Reassembles an entity from its metadata row and its points in key order.
fn rebuild(meta: MetadataRow, points: Vec<DataPointRow>) -> Result<TimeSeries> {
    let id = meta.id;
    let value_columns: Vec<String> = serde_json::from_str(&meta.value_columns)
        .map_err(|e| corrupt(&id, format!("value_columns: {e}")))?;

    let mut by_column: IndexMap<String, (Vec<String>, Vec<Option<f64>>)> = value_columns
        .iter()
        .map(|c| (c.clone(), (Vec::new(), Vec::new())))
        .collect();
    for p in points {
        let Some((times, vals)) = by_column.get_mut(&p.column_name) else {
            return Err(corrupt(&id, format!("point for unknown column {:?}", p.column_name)));
        };
        times.push(p.timestamp);
        vals.push(p.value);
    }

    let axis = by_column
        .first()
        .map(|(_, (times, _))| times.clone())
        .unwrap_or_default();
    if let Some((col, _)) = by_column.iter().find(|(_, (times, _))| *times != axis) {
        return Err(corrupt(&id, format!("column {col:?} does not share the time axis")));
    }

    let time: Vec<TimeValue> = axis.iter().map(|s| TimeValue::from_canonical(s)).collect();
    let values: ColumnValues = by_column
        .into_iter()
        .map(|(c, (_, vals))| (c, vals))
        .collect();
    let series = TimeSeries::from_parts(meta.time_column, value_columns, time, values)
        .map_err(|e| corrupt(&id, e))?;

    let created = parse_stamp(&id, &meta.created_at)?;
    let updated = parse_stamp(&id, &meta.updated_at)?;
    Ok(series.restore_metadata(id, meta.name, meta.description, Some(created), Some(updated)))
}

fn load_one(conn: &mut SqliteConnection, id: &str) -> Result<TimeSeries> {
    conn.transaction(|conn| {
        let meta: Option<MetadataRow> = m::table
            .find(id)
            .select(MetadataRow::as_select())
            .first(conn)
            .optional()?;
        let Some(meta) = meta else {
            return Err(Error::not_found(id));
        };
        let points = DataPointRow::belonging_to(&meta)
            .select(DataPointRow::as_select())
            .order(dp::id.asc())
            .load(conn)?;
        rebuild(meta, points)
    })
}

fn load_all(conn: &mut SqliteConnection) -> Result<Vec<TimeSeries>> {
    conn.transaction(|conn| {
        let metas: Vec<MetadataRow> = m::table
            .select(MetadataRow::as_select())
            .order((m::created_at.asc(), m::id.asc()))
            .load(conn)?;
        let points: Vec<DataPointRow> = DataPointRow::belonging_to(&metas)
            .select(DataPointRow::as_select())
            .order(dp::id.asc())
            .load(conn)?;
        let grouped = points.grouped_by(&metas);
        metas
            .into_iter()
            .zip(grouped)
            .map(|(meta, points)| rebuild(meta, points))
            .collect()
    })
}

/// Everything `save` writes, owned so it can move to the blocking pool.
struct Replacement {
    id: String,
    series: Arc<TimeSeries>,
    value_columns: String,
    times: Vec<String>,
    now: String,
}

/// Replaces the stored series; returns the `created_at` text now on record.
fn replace(conn: &mut SqliteConnection, r: &Replacement) -> Result<String> {
    conn.immediate_transaction(|conn| {
        let existing: Option<String> = m::table
            .find(&r.id)
            .select(m::created_at)
            .first(conn)
            .optional()?;

        let created = match existing {
            Some(created) => {
                diesel::update(m::table.find(&r.id))
                    .set(&MetadataChangeset {
                        name: r.series.name(),
                        description: r.series.description(),
                        time_column: r.series.time_column(),
                        value_columns: &r.value_columns,
                        updated_at: &r.now,
                    })
                    .execute(conn)?;
                let removed = diesel::delete(dp::table.filter(dp::time_series_id.eq(&r.id)))
                    .execute(conn)?;
                debug!(id = %r.id, removed, "cleared previous data points");
                created
            }
            None => {
                diesel::insert_into(m::table)
                    .values(&NewMetadata {
                        id: &r.id,
                        name: r.series.name(),
                        description: r.series.description(),
                        time_column: r.series.time_column(),
                        value_columns: &r.value_columns,
                        created_at: &r.now,
                        updated_at: &r.now,
                    })
                    .execute(conn)?;
                r.now.clone()
            }
        };

        let columns = r.series.value_columns();
        let points: Vec<NewDataPoint<'_>> = r
            .series
            .rows()
            .zip(&r.times)
            .flat_map(|(row, ts)| {
                columns
                    .iter()
                    .zip(row.values)
                    .map(move |(col, value)| NewDataPoint {
                        time_series_id: &r.id,
                        timestamp: ts,
                        column_name: col,
                        value,
                    })
            })
            .collect();
        for chunk in points.chunks(INSERT_CHUNK) {
            diesel::insert_into(dp::table).values(chunk).execute(conn)?;
        }
        Ok(created)
    })
}

#[async_trait]
impl TimeSeriesRepo for SqliteRepo {
    async fn save(&self, series: TimeSeries) -> Result<TimeSeries> {
        let id = series.id().map(str::to_owned).unwrap_or_else(new_id);
        // stored as micros text; truncate so the returned entity matches a reload
        let now = Utc::now().trunc_subsecs(6);
        let replacement = Arc::new(Replacement {
            id: id.clone(),
            value_columns: serde_json::to_string(series.value_columns())
                .map_err(StorageError::from)?,
            times: series.time().iter().map(TimeValue::canonical).collect(),
            now: tz::to_rfc3339_micros(now),
            series: Arc::new(series),
        });

        let created = {
            let replacement = &replacement;
            self.retry
                .run("sqlite.save", move || {
                    let r = Arc::clone(replacement);
                    self.with_conn(move |conn| replace(conn, &r))
                })
                .await?
        };
        let created = parse_stamp(&id, &created)?;

        let rows = replacement.series.len();
        let mut stored = match Arc::try_unwrap(replacement) {
            Ok(r) => Arc::unwrap_or_clone(r.series),
            Err(shared) => TimeSeries::clone(&shared.series),
        };
        stored.stamp(id.clone(), created, now);
        info!(id = %id, rows, "saved time series");
        Ok(stored)
    }

    async fn find_by_id(&self, id: &str) -> Result<TimeSeries> {
        let owned = id.to_string();
        let found = self
            .retry
            .run("sqlite.find_by_id", move || {
                let id = owned.clone();
                self.with_conn(move |conn| load_one(conn, &id))
            })
            .await;
        if let Err(Error::NotFound { .. }) = &found {
            debug!(id, "time series not found");
        }
        found
    }

    async fn find_all(&self) -> Result<Vec<TimeSeries>> {
        self.retry
            .run("sqlite.find_all", move || self.with_conn(load_all))
            .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let owned = id.to_string();
        self.retry
            .run("sqlite.delete", move || {
                let id = owned.clone();
                self.with_conn(move |conn| {
                    let removed = diesel::delete(m::table.find(&id)).execute(conn)?;
                    if removed == 0 {
                        return Err(Error::not_found(id));
                    }
                    Ok(())
                })
            })
            .await?;
        info!(id, "deleted time series");
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let owned = id.to_string();
        self.retry
            .run("sqlite.exists", move || {
                let id = owned.clone();
                self.with_conn(move |conn| {
                    let n: i64 = m::table.find(&id).count().get_result(conn)?;
                    Ok(n > 0)
                })
            })
            .await
    }
}
