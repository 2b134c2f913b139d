//! Embedded SQL migration runner.
//!
//! Migrations are SQL files embedded at compile time. They run sequentially
//! through the schema handle, tracked by the `_bracket_migrations` table.
//! Each migration runs exactly once; if it has already been applied, it is
//! skipped. The SQL in each file is portable between SQLite and Postgres;
//! only the tracking table differs per backend.

use rusqlite::Connection;
use thiserror::Error;

/// A single embedded migration.
pub(crate) struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. New migrations are appended here.
pub(crate) const MIGRATIONS: &[Migration] = &[Migration {
    name: "001_app_meta",
    sql: include_str!("migrations/001_app_meta.sql"),
}];

/// Driver error from whichever backend ran the migration.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Postgres(#[from] postgres::Error),
}

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A SQL statement within a migration failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        /// The name of the migration that failed.
        name: String,
        /// The underlying driver error.
        source: DriverError,
    },

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(DriverError),
}

/// A connection that migrations can be applied through.
pub(crate) trait MigrationBackend {
    /// Creates the tracking table if it does not exist yet.
    fn ensure_tracking_table(&mut self) -> Result<(), DriverError>;

    fn is_applied(&mut self, name: &str) -> Result<bool, DriverError>;

    /// Runs the migration and records it, atomically.
    fn apply(&mut self, migration: &Migration) -> Result<(), DriverError>;
}

impl MigrationBackend for Connection {
    fn ensure_tracking_table(&mut self) -> Result<(), DriverError> {
        self.execute_batch(
            "CREATE TABLE IF NOT EXISTS _bracket_migrations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )?;
        Ok(())
    }

    fn is_applied(&mut self, name: &str) -> Result<bool, DriverError> {
        let applied = self.query_row(
            "SELECT COUNT(*) > 0 FROM _bracket_migrations WHERE name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(applied)
    }

    fn apply(&mut self, migration: &Migration) -> Result<(), DriverError> {
        let tx = self.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO _bracket_migrations (name) VALUES (?1)",
            [migration.name],
        )?;
        tx.commit()?;
        Ok(())
    }
}

impl MigrationBackend for postgres::Client {
    fn ensure_tracking_table(&mut self) -> Result<(), DriverError> {
        self.batch_execute(
            "CREATE TABLE IF NOT EXISTS _bracket_migrations (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );",
        )?;
        Ok(())
    }

    fn is_applied(&mut self, name: &str) -> Result<bool, DriverError> {
        let row = self.query_one(
            "SELECT COUNT(*) > 0 FROM _bracket_migrations WHERE name = $1",
            &[&name],
        )?;
        Ok(row.get(0))
    }

    fn apply(&mut self, migration: &Migration) -> Result<(), DriverError> {
        let mut tx = self.transaction()?;
        tx.batch_execute(migration.sql)?;
        tx.execute(
            "INSERT INTO _bracket_migrations (name) VALUES ($1)",
            &[&migration.name],
        )?;
        tx.commit()?;
        Ok(())
    }
}

/// Runs all pending embedded migrations through `backend`.
///
/// Returns the number of migrations applied by this call.
pub(crate) fn run_migrations<B: MigrationBackend>(backend: &mut B) -> Result<usize, MigrationError> {
    run_migrations_from_list(backend, MIGRATIONS)
}

fn run_migrations_from_list<B: MigrationBackend>(
    backend: &mut B,
    migrations: &[Migration],
) -> Result<usize, MigrationError> {
    backend
        .ensure_tracking_table()
        .map_err(|e| MigrationError::ExecutionFailed {
            name: "_bracket_migrations_bootstrap".to_string(),
            source: e,
        })?;

    let mut applied = 0;

    for migration in migrations {
        if backend
            .is_applied(migration.name)
            .map_err(MigrationError::StateQuery)?
        {
            tracing::debug!(
                migration = migration.name,
                "migration already applied, skipping"
            );
            continue;
        }

        tracing::info!(migration = migration.name, "applying migration");

        backend
            .apply(migration)
            .map_err(|e| MigrationError::ExecutionFailed {
                name: migration.name.to_string(),
                source: e,
            })?;

        applied += 1;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [name],
            |row| row.get(0),
        )
        .expect("should query sqlite_master")
    }

    #[test]
    fn run_migrations_on_fresh_db() {
        let mut conn = Connection::open_in_memory().expect("should open in-memory db");
        let applied = run_migrations(&mut conn).expect("migrations should succeed");
        assert_eq!(applied, MIGRATIONS.len());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM _bracket_migrations", [], |row| {
                row.get(0)
            })
            .expect("should query migration count");
        assert_eq!(count, MIGRATIONS.len() as i64);
        assert!(table_exists(&conn, "app_meta"));
    }

    #[test]
    fn run_migrations_idempotent() {
        let mut conn = Connection::open_in_memory().expect("should open in-memory db");

        let first = run_migrations(&mut conn).expect("first run should succeed");
        assert_eq!(first, 1);

        let second = run_migrations(&mut conn).expect("second run should succeed");
        assert_eq!(second, 0, "no new migrations to apply");
    }

    #[test]
    fn migration_side_effects_rollback_when_tracking_insert_fails() {
        let mut conn = Connection::open_in_memory().expect("should open in-memory db");
        let migrations = [Migration {
            name: "001_tracking_insert_conflict",
            sql: "
                CREATE TABLE rollback_probe (id INTEGER PRIMARY KEY);
                INSERT INTO _bracket_migrations (name) VALUES ('001_tracking_insert_conflict');
            ",
        }];

        let err = run_migrations_from_list(&mut conn, &migrations)
            .expect_err("tracking insert conflict should fail migration");

        match err {
            MigrationError::ExecutionFailed { name, .. } => {
                assert_eq!(name, "001_tracking_insert_conflict")
            }
            other => panic!("unexpected error type: {other:?}"),
        }

        assert!(
            !table_exists(&conn, "rollback_probe"),
            "schema side effects should be rolled back when tracking insert fails"
        );
    }

    #[test]
    fn broken_sql_reports_migration_name() {
        let mut conn = Connection::open_in_memory().expect("should open in-memory db");
        let migrations = [
            Migration {
                name: "001_ok",
                sql: "CREATE TABLE first_ok (id INTEGER PRIMARY KEY);",
            },
            Migration {
                name: "002_broken",
                sql: "CREATE TABLE oops (",
            },
        ];

        let err = run_migrations_from_list(&mut conn, &migrations).expect_err("should fail");
        assert!(err.to_string().contains("002_broken"), "got: {err}");
        assert!(table_exists(&conn, "first_ok"), "earlier migrations stay applied");
    }
}
