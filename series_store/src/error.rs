//! Error kinds returned by the store.
//!
//! Callers see three semantic kinds through [`Error`]:
//! - [`Error::Validation`]: malformed construction input (client fault).
//! - [`Error::NotFound`]: unknown id on find/delete (client fault, distinct kind).
//! - [`Error::Storage`]: disk or database failure (server fault). Transient
//!   storage failures are retried by the repositories before surfacing.
//!
//! Cache backend failures have their own type ([`crate::cache::CacheError`])
//! and never leave the cache decorator.

use std::path::PathBuf;

use thiserror::Error;

/// Result type used by repositories and the service layer.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level error kind.
#[derive(Debug, Error)]
pub enum Error {
    /// Construction input was rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No time series is stored under `id`.
    #[error("time series {id} not found")]
    NotFound {
        /// The id that was looked up.
        id: String,
    },

    /// The persistence layer failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl Error {
    /// Builds a [`Error::NotFound`] for `id`.
    pub fn not_found(id: impl Into<String>) -> Self {
        Error::NotFound { id: id.into() }
    }

    /// `true` for kinds caused by the caller (validation, unknown id).
    pub fn is_client_fault(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::NotFound { .. })
    }

    /// `true` when the error is [`Error::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

impl From<diesel::result::Error> for Error {
    fn from(e: diesel::result::Error) -> Self {
        Error::Storage(StorageError::Database(e))
    }
}

/// Reasons a raw table cannot become a [`crate::model::TimeSeries`].
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// The designated time column is not among the raw columns.
    #[error("time column {column:?} not found in data")]
    MissingTimeColumn {
        /// Requested time column.
        column: String,
    },

    /// A requested value column is not among the raw columns.
    #[error("value column {column:?} not found in data")]
    UnknownValueColumn {
        /// Requested value column.
        column: String,
    },

    /// No value columns were selected.
    #[error("at least one value column is required")]
    EmptyValueColumns,

    /// The time column was also listed as a value column.
    #[error("column {column:?} cannot be both the time column and a value column")]
    TimeColumnSelectedAsValue {
        /// Offending column.
        column: String,
    },

    /// A value column was listed twice.
    #[error("value column {column:?} listed more than once")]
    DuplicateValueColumn {
        /// Offending column.
        column: String,
    },

    /// The raw header row itself repeats a column name.
    #[error("raw data has duplicate column {column:?}")]
    DuplicateRawColumn {
        /// Offending column.
        column: String,
    },

    /// A row does not have one cell per raw column.
    #[error("row {row} has {found} cells, expected {expected}")]
    RowLength {
        /// Zero-based row index.
        row: usize,
        /// Number of raw columns.
        expected: usize,
        /// Number of cells found.
        found: usize,
    },

    /// A row has no time value.
    #[error("row {row} has an empty time value")]
    MissingTimeValue {
        /// Zero-based row index.
        row: usize,
    },

    /// Two rows share the same time value.
    #[error("row {row} repeats time value {value:?}")]
    DuplicateTimeValue {
        /// Zero-based row index of the repeat.
        row: usize,
        /// The repeated value in its canonical form.
        value: String,
    },

    /// A naive timestamp cannot be placed in the configured time zone.
    #[error("row {row}: time value {value:?} cannot be resolved: {reason}")]
    UnresolvableTime {
        /// Zero-based row index.
        row: usize,
        /// Raw cell.
        value: String,
        /// Why resolution failed.
        reason: String,
    },

    /// A value cell is neither empty nor a number.
    #[error("row {row}, column {column:?}: {raw:?} is not numeric")]
    NonNumericValue {
        /// Zero-based row index.
        row: usize,
        /// Value column name.
        column: String,
        /// Raw cell.
        raw: String,
    },

    /// A value is NaN or infinite; missing values are `None`.
    #[error("row {row}, column {column:?}: value is not finite")]
    NonFiniteValue {
        /// Zero-based row index.
        row: usize,
        /// Value column name.
        column: String,
    },

    /// Per-column sequences disagree in length (restored or hand-built data).
    #[error("column {column:?} has {found} values, time column has {expected}")]
    ColumnLength {
        /// Column name.
        column: String,
        /// Length of the time sequence.
        expected: usize,
        /// Length of the column.
        found: usize,
    },
}

/// Failures of the persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A diesel query failed.
    #[error("database query failed")]
    Database(#[from] diesel::result::Error),

    /// A database connection could not be established.
    #[error("database connection failed")]
    Connection(#[from] diesel::ConnectionError),

    /// Embedded migrations did not apply.
    #[error("database migration failed: {0}")]
    Migration(String),

    /// Filesystem I/O failed.
    #[error("I/O error on {path}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON encoding or decoding failed.
    #[error("serialization failed")]
    Serde(#[from] serde_json::Error),

    /// Persisted content violates an entity invariant.
    #[error("corrupt stored data: {0}")]
    Corrupt(String),

    /// A blocking task panicked or was cancelled.
    #[error("background task failed")]
    Join(#[from] tokio::task::JoinError),
}

impl StorageError {
    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// SQLite reports lock contention as `SQLITE_BUSY`/`SQLITE_LOCKED`, which
    /// diesel surfaces as an unknown database error carrying the message.
    pub fn is_transient(&self) -> bool {
        use diesel::result::Error as DieselError;
        use std::io::ErrorKind;

        match self {
            StorageError::Database(DieselError::DatabaseError(_, info)) => {
                let msg = info.message().to_ascii_lowercase();
                msg.contains("database is locked") || msg.contains("busy")
            }
            StorageError::Database(DieselError::BrokenTransactionManager) => false,
            StorageError::Io { source, .. } => matches!(
                source.kind(),
                ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}
