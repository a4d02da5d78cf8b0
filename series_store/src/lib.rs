//! Storage and analysis of uploaded time series.
//!
//! Tabular uploads become validated [`model::TimeSeries`] entities that expose
//! a time-domain view and an FFT magnitude spectrum ([`transform`]). Entities
//! persist through a [`repo::TimeSeriesRepo`] backend (JSON file or SQLite),
//! optionally behind a TTL cache ([`cache::CachedRepo`]) that also caches the
//! derived views. [`service::TimeSeriesService`] ties these together for an
//! outer API layer; [`config`] selects backends at runtime.

#![deny(missing_docs)]

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod model;
pub mod models;
pub mod preprocess;
pub mod repo;
#[allow(missing_docs)]
pub mod schema;
pub mod service;
pub mod transform;
pub mod tz;

pub use error::{Error, Result, StorageError, ValidationError};
pub use model::{RawTable, TimeSeries, TimeValue};
pub use repo::TimeSeriesRepo;
