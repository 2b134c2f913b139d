//! One-shot storage bootstrap.

use crate::client::{build_client_handle, ClientHandle};
use crate::error::StorageError;
use crate::mode::DeploymentMode;
use crate::schema::{build_schema_handle, SchemaHandle};
use crate::target::{resolve_target, StorageSettings, StorageTarget};

/// Both storage handles, bound to one resolved target.
///
/// Built once at startup and passed to whatever needs storage access.
#[derive(Debug, Clone)]
pub struct StorageHandles {
    target: StorageTarget,
    client: ClientHandle,
    schema: SchemaHandle,
}

impl StorageHandles {
    pub fn target(&self) -> &StorageTarget {
        &self.target
    }

    pub fn mode(&self) -> DeploymentMode {
        self.target.mode()
    }

    pub fn client(&self) -> &ClientHandle {
        &self.client
    }

    pub fn schema(&self) -> &SchemaHandle {
        &self.schema
    }

    /// Splits into the target, the async client and the blocking schema
    /// handle, so each can be owned where it is used.
    pub fn into_parts(self) -> (StorageTarget, ClientHandle, SchemaHandle) {
        (self.target, self.client, self.schema)
    }
}

/// Resolves the storage target once and builds both handles from it.
///
/// Nothing is retried and no other location is tried; any error should
/// abort startup. Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns the first `StorageError` from resolution or handle construction.
pub fn bootstrap(settings: &StorageSettings) -> Result<StorageHandles, StorageError> {
    let target = resolve_target(settings)?;
    tracing::info!(mode = target.mode().as_str(), %target, "resolved storage backend");

    let client = build_client_handle(&target, &settings.runtime)?;
    let schema = build_schema_handle(&target, &settings.runtime)?;

    Ok(StorageHandles {
        target,
        client,
        schema,
    })
}
