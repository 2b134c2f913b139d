//! Storage bootstrap for the Bracket backend.
//!
//! Picks a storage backend once per process and hands out two handles bound
//! to the same target: an async query client (`sqlx`) and a synchronous
//! schema handle (`r2d2`) used for migrations and introspection.
//!
//! # Design decisions
//!
//! - **Two backends, one descriptor**: standalone deployments keep their
//!   data in a SQLite file next to the executable; regular deployments talk
//!   to a Postgres server. The choice is made by [`resolve_target`] and
//!   captured in a [`StorageTarget`]; nothing downstream inspects URL
//!   prefixes again.
//! - **Lazy connectivity**: both pools are built without opening a
//!   connection. An unreachable server or a locked file surfaces on first
//!   use, not at bootstrap.
//! - **Explicit handles**: [`bootstrap`] returns a [`StorageHandles`] value
//!   that the caller owns and passes on. There is no process-global state.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!` and applied through the schema handle on either backend.
//! - **Blocking handle stays off async workers**: the Postgres schema pool
//!   owns sync driver clients that must not be used or dropped on a Tokio
//!   worker. Split the handles with [`StorageHandles::into_parts`] and move
//!   the [`SchemaHandle`] into a blocking task instead of keeping it in
//!   shared async state.

mod bootstrap;
mod client;
mod codec;
mod error;
mod migrations;
mod mode;
mod schema;
mod target;

pub use bootstrap::{bootstrap, StorageHandles};
pub use client::{build_client_handle, AppliedMigration, ClientHandle, ClientPool, MetaEntry};
pub use codec::{
    decode_timestamp, encode_timestamp, CodecError, TimestampCodec, TimestampKind, UtcTimestamp,
};
pub use error::StorageError;
pub use migrations::{DriverError, MigrationError};
pub use mode::{DataLocation, DeploymentMode, STANDALONE_ENV};
pub use schema::{build_schema_handle, SchemaHandle, SchemaPool};
pub use target::{
    resolve_connection_string, resolve_target, sync_url, DbRuntimeSettings, PgDsn,
    StorageSettings, StorageTarget, DATA_FILE_NAME,
};
