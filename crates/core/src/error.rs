//! Errors reported by gateway collaborators.

use thiserror::Error;

/// Failure to acquire an engine artifact for a version.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The version string cannot name an artifact.
    #[error("Unsupported engine version: {0}")]
    UnsupportedVersion(String),

    /// The artifact is not available locally and no mirror is configured.
    #[error("Engine artifact not found: {0}")]
    NotFound(String),

    /// Fetching the artifact from the mirror failed.
    #[error("Engine download failed: {0}")]
    Download(String),

    /// Local filesystem error.
    #[error("Engine artifact I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to bring up an engine instance from an acquired artifact.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The schema snapshot was rejected by the engine.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// The engine could not reach the datasource.
    #[error("Datasource connection failed: {0}")]
    Connection(String),

    /// The engine process could not be launched or never became ready.
    #[error("Engine process failed: {0}")]
    Process(String),

    /// The artifact kind is not supported by this factory.
    #[error("Unsupported engine artifact: {0}")]
    UnsupportedArtifact(String),
}

/// Failure to persist a schema snapshot.
#[derive(Debug, Error)]
pub enum SchemaStoreError {
    #[error("Schema store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema store unavailable: {0}")]
    Unavailable(String),
}
