#![allow(dead_code)]

use diesel::QueryableByName;
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{Integer, Text};
use series_store::db::{connection, migrate};
use series_store::{RawTable, TimeSeries};
use std::path::PathBuf;
use tempfile::TempDir;

#[derive(QueryableByName)]
struct JournalMode {
    #[diesel(sql_type = Text)]
    journal_mode: String,
}
#[derive(QueryableByName)]
struct ForeignKeys {
    #[diesel(sql_type = Integer)]
    foreign_keys: i32,
}
#[derive(QueryableByName)]
struct BusyTimeout {
    #[diesel(sql_type = Integer, column_name = "timeout")]
    busy_timeout: i32,
}
#[derive(QueryableByName)]
struct Cnt {
    #[diesel(sql_type = Integer)]
    cnt: i32,
}

pub struct TestDb {
    _dir: TempDir,    // keep alive for the life of the test
    pub path: String, // <tmpdir>/test.db
}

pub fn setup_db() -> (TestDb, SqliteConnection) {
    let dir = TempDir::new().expect("tempdir");
    let mut p = PathBuf::from(dir.path());
    p.push("test.db");
    let path = p.to_string_lossy().to_string();

    migrate::run_all(&path).expect("migrations");

    let conn = connection::connect_sqlite(&path).expect("connect");
    (TestDb { _dir: dir, path }, conn)
}

pub fn assert_sqlite_pragmas(conn: &mut SqliteConnection) {
    let jm: JournalMode = sql_query("PRAGMA journal_mode;").get_result(conn).unwrap();
    assert_eq!(jm.journal_mode.to_lowercase(), "wal"); // WAL is persistent per DB file

    let fk: ForeignKeys = sql_query("PRAGMA foreign_keys;").get_result(conn).unwrap();
    assert_eq!(fk.foreign_keys, 1);

    let bt: BusyTimeout = sql_query("PRAGMA busy_timeout;").get_result(conn).unwrap();
    assert_eq!(bt.busy_timeout, 5000);
}

/// Runs a `SELECT COUNT(*) AS cnt ...` query.
pub fn count(conn: &mut SqliteConnection, sql: &str) -> i32 {
    let c: Cnt = sql_query(sql).get_result(conn).unwrap();
    c.cnt
}

pub fn point_count(conn: &mut SqliteConnection, id: &str) -> i32 {
    count(
        conn,
        &format!(
            "SELECT COUNT(*) AS cnt FROM time_series_data_points WHERE time_series_id = '{id}';"
        ),
    )
}

pub fn fk_check_empty(conn: &mut SqliteConnection) {
    let n = count(conn, "SELECT COUNT(*) AS cnt FROM pragma_foreign_key_check;");
    assert_eq!(n, 0, "foreign key violations present");
}

/// Four hourly samples, `load` has one gap.
pub fn hourly() -> TimeSeries {
    let raw = RawTable::from_strings(
        &["time", "temp", "load"],
        &[
            &["2024-03-01T00:00:00Z", "1.5", "10"],
            &["2024-03-01T01:00:00Z", "2.5", ""],
            &["2024-03-01T02:00:00Z", "3.5", "30"],
            &["2024-03-01T03:00:00Z", "4.5", "40"],
        ],
    );
    TimeSeries::from_table(&raw, "time", &["temp".to_string(), "load".to_string()]).unwrap()
}

/// `n` rows on a numeric axis with a single value column `v`.
pub fn numeric(n: usize) -> TimeSeries {
    let columns = vec!["t".to_string(), "v".to_string()];
    let rows = (0..n)
        .map(|i| vec![Some(i.to_string()), Some(format!("{}", (i as f64 * 0.5).sin()))])
        .collect();
    let raw = RawTable::new(columns, rows);
    TimeSeries::from_table(&raw, "t", &["v".to_string()]).unwrap()
}
