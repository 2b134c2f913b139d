//! Synchronous schema handle: connection pools for migrations and
//! introspection.
//!
//! Operations here block. Call them at startup or from
//! `tokio::task::spawn_blocking`, never directly on an async worker; the
//! Postgres driver runs its own runtime internally.

use std::fmt;
use std::path::PathBuf;

use postgres::NoTls;
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;

use crate::error::StorageError;
use crate::migrations;
use crate::target::{sync_url, DbRuntimeSettings, StorageTarget};

/// The backend-specific pool behind a [`SchemaHandle`].
#[derive(Clone)]
pub enum SchemaPool {
    Sqlite(Pool<SqliteConnectionManager>),
    Postgres(Pool<PostgresConnectionManager<NoTls>>),
}

impl fmt::Debug for SchemaPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (backend, state) = match self {
            Self::Sqlite(pool) => ("sqlite", pool.state()),
            Self::Postgres(pool) => ("postgres", pool.state()),
        };
        f.debug_struct("SchemaPool")
            .field("backend", &backend)
            .field("connections", &state.connections)
            .field("idle", &state.idle_connections)
            .finish()
    }
}

/// Schema-level access to the same target as the client handle.
#[derive(Debug, Clone)]
pub struct SchemaHandle {
    target: StorageTarget,
    url: String,
    pool: SchemaPool,
}

/// Builds the synchronous schema handle for `target`.
///
/// The target's async URL is rewritten into its synchronous form, which is
/// kept for reporting. The SQLite pool opens the target's own path rather
/// than re-parsing that URL, so paths that are not valid UTF-8 reach the same
/// file as the client handle. Connections are opened on demand.
///
/// # Errors
///
/// Returns `StorageError::InvalidDsn` for a DSN the Postgres driver rejects
/// and `StorageError::UnsupportedUrl` if the URL cannot be rewritten.
pub fn build_schema_handle(
    target: &StorageTarget,
    runtime: &DbRuntimeSettings,
) -> Result<SchemaHandle, StorageError> {
    let url = sync_url(&target.connection_url())?;

    let pool = match target {
        StorageTarget::Embedded { path } => SchemaPool::Sqlite(sqlite_pool(path.clone(), *runtime)),
        StorageTarget::Server { .. } => {
            let config: postgres::Config = url
                .parse()
                .map_err(|e: postgres::Error| StorageError::InvalidDsn(e.to_string()))?;
            let manager = PostgresConnectionManager::new(config, NoTls);
            SchemaPool::Postgres(
                Pool::builder()
                    .max_size(runtime.pool_max_size)
                    .min_idle(Some(0))
                    .build_unchecked(manager),
            )
        }
    };

    tracing::info!(mode = target.mode().as_str(), "built storage schema handle");

    Ok(SchemaHandle {
        target: target.clone(),
        url,
        pool,
    })
}

/// SQLite pool with WAL mode, foreign keys and a busy timeout on every
/// connection.
fn sqlite_pool(path: PathBuf, settings: DbRuntimeSettings) -> Pool<SqliteConnectionManager> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

    let manager = SqliteConnectionManager::file(path)
        .with_flags(flags)
        .with_init(move |conn| {
            // In-memory databases report "memory", which is acceptable.
            let journal_mode: String =
                conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
            if journal_mode != "wal" && journal_mode != "memory" {
                return Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                    Some(format!(
                        "failed to set WAL journal mode, got: {}",
                        journal_mode
                    )),
                ));
            }
            conn.execute_batch(&format!(
                "PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = {};",
                settings.busy_timeout_ms
            ))
        });

    Pool::builder()
        .max_size(settings.pool_max_size)
        .min_idle(Some(0))
        .build_unchecked(manager)
}

impl SchemaHandle {
    pub fn target(&self) -> &StorageTarget {
        &self.target
    }

    /// The synchronous connection URL this handle was built from.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn pool(&self) -> &SchemaPool {
        &self.pool
    }

    /// Applies pending embedded migrations and returns how many ran.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Pool` if no connection can be obtained and
    /// `StorageError::Migration` if a migration fails.
    pub fn run_migrations(&self) -> Result<usize, StorageError> {
        let applied = match &self.pool {
            SchemaPool::Sqlite(pool) => {
                let mut conn = pool.get()?;
                migrations::run_migrations(&mut *conn)?
            }
            SchemaPool::Postgres(pool) => {
                let mut conn = pool.get()?;
                migrations::run_migrations(&mut *conn)?
            }
        };
        Ok(applied)
    }

    /// Lists user tables in the target schema, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns a driver or pool error if the catalog cannot be read.
    pub fn table_names(&self) -> Result<Vec<String>, StorageError> {
        match &self.pool {
            SchemaPool::Sqlite(pool) => {
                let conn = pool.get()?;
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                     ORDER BY name",
                )?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            }
            SchemaPool::Postgres(pool) => {
                let mut conn = pool.get()?;
                let rows = conn.query(
                    "SELECT table_name::text FROM information_schema.tables
                     WHERE table_schema = current_schema()
                     ORDER BY table_name",
                    &[],
                )?;
                Ok(rows.iter().map(|row| row.get(0)).collect())
            }
        }
    }
}
