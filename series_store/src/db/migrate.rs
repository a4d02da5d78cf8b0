//! Embedded migrations and their runners.

use anyhow::{Context, anyhow};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use crate::db::connection::connect_sqlite;

/// Embedded Diesel migrations bundled with this crate.
///
/// These are applied by [`run_sqlite`] to bring the database schema up to date.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Runs pending Diesel migrations on a SQLite database at the given URL.
///
/// The connection gets the usual PRAGMAs first, so the database file is in
/// WAL mode afterwards. Returns the number of migrations applied.
pub fn run_sqlite(url: &str) -> anyhow::Result<usize> {
    let mut conn = connect_sqlite(url).with_context(|| format!("opening {url}"))?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow!(e))?;

    tracing::info!(url, applied = applied.len(), "migrations applied");
    Ok(applied.len())
}

/// Runs pending migrations for the given database URL.
///
/// Accepts `sqlite://path`, `sqlite:path` and bare file paths. Server
/// databases are rejected.
pub fn run_all(database_url: &str) -> anyhow::Result<usize> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        anyhow::bail!("Unsupported DATABASE_URL: {database_url} (only SQLite is built in)");
    }
    run_sqlite(database_url)
}

#[cfg(test)]
mod test {
    use super::*;
    use diesel::connection::SimpleConnection;

    #[test]
    fn migrations_apply_on_temp_file() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let path = temp.path().to_string_lossy().to_string();

        assert_eq!(run_sqlite(&path).expect("migration run"), 1);
        assert_eq!(run_all(&path).expect("second run is a no-op"), 0);

        let mut conn = connect_sqlite(&path).unwrap();
        conn.batch_execute(
            "INSERT INTO time_series_metadata
                (id, time_column, value_columns, created_at, updated_at)
             VALUES ('a', 't', '[\"v\"]', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
        )
        .unwrap();
    }

    #[test]
    fn postgres_urls_are_rejected() {
        assert!(run_all("postgres://localhost/db").is_err());
    }
}
