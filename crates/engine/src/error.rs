//! Error types for engine provisioning.

use accelerate_core::{ArtifactError, StartupError};
use accelerate_types::{EngineKey, EngineVersion, GatewayError};
use thiserror::Error;

/// Errors while resolving or provisioning an engine instance.
///
/// `Clone` because one in-flight provisioning result is handed to every
/// request waiting on it.
#[derive(Debug, Clone, Error)]
pub enum ProvisionError {
    /// No live instance and no snapshot to build one from.
    #[error("No schema snapshot for {0}")]
    SchemaMissing(EngineKey),

    /// The engine artifact for the version could not be acquired.
    #[error("Engine artifact unavailable for {version}: {reason}")]
    EngineMissing {
        version: EngineVersion,
        reason: String,
    },

    /// The instance could not be constructed from the artifact.
    #[error("Engine startup failed: {0}")]
    Startup(String),

    /// A snapshot could not be persisted.
    #[error("Schema store failed: {0}")]
    SchemaStore(String),
}

impl ProvisionError {
    pub(crate) fn from_artifact(version: &EngineVersion, err: ArtifactError) -> Self {
        ProvisionError::EngineMissing {
            version: version.clone(),
            reason: err.to_string(),
        }
    }
}

impl From<StartupError> for ProvisionError {
    fn from(err: StartupError) -> Self {
        ProvisionError::Startup(err.to_string())
    }
}

impl From<ProvisionError> for GatewayError {
    fn from(err: ProvisionError) -> Self {
        match err {
            ProvisionError::SchemaMissing(key) => GatewayError::SchemaMissing(key),
            ProvisionError::EngineMissing { version, .. } => GatewayError::EngineMissing(version),
            ProvisionError::Startup(message) | ProvisionError::SchemaStore(message) => {
                GatewayError::EngineStartup(message)
            }
        }
    }
}
