//! Standalone Bracket backend shell.
//!
//! Boots storage through `bracket-db`, applies migrations, and serves a
//! health endpoint. Tournament routes are mounted by the application on top
//! of [`app`].

pub mod config;
pub mod readiness;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use bracket_db::{bootstrap, encode_timestamp, ClientHandle, SchemaHandle, StorageError};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::{Config, ConfigError, LoggingConfig};

/// Crate version reported by `/health`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `app_meta` key recording when this process finished bootstrapping.
pub const STARTED_AT_KEY: &str = "server.started_at";

/// Application state shared across all request handlers.
///
/// Holds only the async client. The blocking schema handle is consumed by
/// [`apply_migrations`] during startup and never reaches the router.
#[derive(Clone)]
pub struct AppState {
    /// Async storage client resolved at startup.
    pub client: ClientHandle,
    /// When storage bootstrap completed.
    pub started_at: DateTime<Utc>,
}

/// Errors that abort server startup.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("storage bootstrap failed: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),

    #[error("migration task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Health check handler.
///
/// Returns `200 OK` when the storage backend answers a ping and
/// `503 Service Unavailable` otherwise.
async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let (status, code, database) = match state.client.ping().await {
        Ok(()) => ("ok", StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!(error = %e, "health check could not reach storage");
            ("degraded", StatusCode::SERVICE_UNAVAILABLE, "unreachable")
        }
    };

    (
        code,
        Json(json!({
            "status": status,
            "version": VERSION,
            "storage": state.client.mode().as_str(),
            "database": database,
            "started_at": encode_timestamp(&state.started_at),
        })),
    )
}

/// Builds the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}

/// Applies pending migrations on a blocking thread.
///
/// Takes the schema handle by value so its pool, and any sync driver
/// connections in it, are dropped on that thread as well.
///
/// # Errors
///
/// Returns `ServerError::Storage` if a migration fails and
/// `ServerError::Join` if the blocking task panics.
pub async fn apply_migrations(schema: SchemaHandle) -> Result<usize, ServerError> {
    let applied = tokio::task::spawn_blocking(move || {
        let applied = schema.run_migrations();
        drop(schema);
        applied
    })
    .await??;
    if applied > 0 {
        tracing::info!(count = applied, "applied database migrations");
    }
    Ok(applied)
}

/// Bootstraps storage, applies migrations, records the start time, and
/// binds the listener.
///
/// # Errors
///
/// Returns `ServerError` for any failure; none of them are recovered.
pub async fn prepare_server(config: Config) -> Result<(TcpListener, Router), ServerError> {
    let settings = config.storage_settings()?;
    let (_target, client, schema) = bootstrap(&settings)?.into_parts();
    apply_migrations(schema).await?;

    let started_at = Utc::now();
    client.put_meta(STARTED_AT_KEY, VERSION, started_at).await?;

    let addr = config.server_addr();
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, storage = client.mode().as_str(), "listener bound");

    let state = AppState { client, started_at };
    Ok((listener, app(state)))
}

/// Installs the global tracing subscriber.
///
/// # Errors
///
/// Fails if a subscriber is already installed.
pub fn init_tracing(
    logging: &LoggingConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter = tracing_subscriber::EnvFilter::try_new(&logging.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    }
}
