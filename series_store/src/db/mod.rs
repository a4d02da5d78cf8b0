//! Database utilities for connections and schema migrations.
//!
//! This module provides:
//! - SQLite connection helper: [`connection::connect_sqlite`] applies WAL, foreign_keys=ON, and a 5000ms busy_timeout.
//! - Embedded Diesel migrations and runners: [`migrate::run_sqlite`] and [`migrate::run_all`]
//!   (accepts `sqlite:` URLs or bare paths).
//!
//! Example:
//! ```no_run
//! use series_store::db::{migrate, connection};
//!
//! let db_path = std::env::temp_dir().join("series_store_example.db");
//! migrate::run_all(&db_path.to_string_lossy()).expect("migrations");
//!
//! let _conn = connection::connect_sqlite(&db_path.to_string_lossy()).expect("connect");
//! ```

pub mod connection;
pub mod migrate;
