//! SQLite connection helpers.
//!
//! [`connect_sqlite`] opens a connection and applies the connection-wide
//! PRAGMAs the repository relies on: WAL journaling, foreign_keys=ON (needed for the
//! cascading delete of data points), and a 5000ms busy_timeout.
//!
//! Example:
//! ```no_run
//! use series_store::db::connection::connect_sqlite;
//!
//! let path = std::env::temp_dir().join("series_store_example.db");
//! let _conn = connect_sqlite(&path.to_string_lossy()).expect("open sqlite");
//! ```

use diesel::{Connection, RunQueryDsl, SqliteConnection, sql_query};

use crate::error::StorageError;

/// Strips a `sqlite://` or `sqlite:` scheme, leaving a path (or `:memory:`).
pub fn sqlite_path(database_url: &str) -> &str {
    database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url)
}

/// Open a SQLite connection and apply connection-wide PRAGMAs.
pub fn connect_sqlite(database_url: &str) -> Result<SqliteConnection, StorageError> {
    let mut conn = SqliteConnection::establish(sqlite_path(database_url))?;

    sql_query("PRAGMA journal_mode=WAL;").execute(&mut conn)?;
    sql_query("PRAGMA foreign_keys=ON;").execute(&mut conn)?;
    sql_query("PRAGMA busy_timeout=5000;").execute(&mut conn)?;
    Ok(conn)
}
