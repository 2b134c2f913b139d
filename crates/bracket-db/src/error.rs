//! Error types for storage bootstrap and access.

use std::path::PathBuf;
use thiserror::Error;

use crate::codec::CodecError;
use crate::migrations::MigrationError;

/// Errors that can occur while resolving or using the storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The embedded data directory could not be located or created.
    #[error("failed to prepare data directory {path}: {source}")]
    DataDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Server mode was selected but no DSN was configured.
    #[error("server mode requires a Postgres DSN, none configured")]
    MissingDsn,

    /// The DSN could not be parsed.
    #[error("invalid database DSN: {0}")]
    InvalidDsn(String),

    /// The URL handed to the schema handle is not a recognized form.
    #[error("unsupported connection URL: {0}")]
    UnsupportedUrl(String),

    /// The schema pool could not hand out a connection.
    #[error("database connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// An async query failed, including deferred connection failures.
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// A synchronous SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A synchronous Postgres operation failed.
    #[error("postgres error: {0}")]
    Postgres(#[from] postgres::Error),

    /// A timestamp value could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A schema migration failed.
    #[error(transparent)]
    Migration(#[from] MigrationError),
}
