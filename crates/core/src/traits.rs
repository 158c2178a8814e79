//! Collaborator traits.
//!
//! The gateway owns engine identity, credentials and transaction bookkeeping.
//! Everything else sits behind these seams:
//!
//! - [`QueryEngine`]: a running, schema-bound engine instance
//! - [`EngineProvisioner`]: acquires the engine artifact for a version
//! - [`EngineFactory`]: turns an artifact + schema + datasource into a [`QueryEngine`]
//! - [`SchemaStore`]: optional external persistence of schema snapshots
//!
//! # Example
//!
//! ```ignore
//! let artifact = provisioner.acquire(&key.version).await?;
//! let engine = factory
//!     .create(EngineSpec { key, artifact, schema })
//!     .await?;
//! let result = engine.request(query, None).await;
//! engine.dispose().await;
//! ```

use crate::error::{ArtifactError, SchemaStoreError, StartupError};
use accelerate_types::{
    EngineError, EngineKey, EngineVersion, IsolationLevel, TransactionId, TransactionOptions,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Options for running a batch inside one engine-side transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTransaction {
    #[serde(
        default,
        rename = "isolationLevel",
        alias = "isolation_level",
        skip_serializing_if = "Option::is_none"
    )]
    pub isolation_level: Option<IsolationLevel>,
}

/// A batch of operations.
///
/// With `transaction` set the batch is all-or-nothing: the engine either
/// returns every result or a single error. Without it each operation runs
/// independently and gets its own result or error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchRequest {
    pub queries: Vec<Value>,
    pub transaction: Option<BatchTransaction>,
}

impl BatchRequest {
    pub fn is_transactional(&self) -> bool {
        self.transaction.is_some()
    }
}

/// Result of a single operation in a batch.
pub type BatchItem = Result<Value, EngineError>;

/// A running engine instance bound to one (version, schema, datasource).
///
/// Implementations are shared across concurrent requests, so every method
/// takes `&self`. Access to a single transaction handle is serialized by the
/// engine itself.
#[async_trait]
pub trait QueryEngine: Send + Sync + 'static {
    /// Execute one operation, optionally inside an interactive transaction.
    async fn request(
        &self,
        query: Value,
        transaction: Option<&TransactionId>,
    ) -> Result<Value, EngineError>;

    /// Execute a batch.
    ///
    /// The outer error is returned when the batch as a whole failed (always
    /// the case for a failing transactional batch). Per-item errors are only
    /// reported for non-transactional batches.
    async fn request_batch(&self, batch: BatchRequest) -> Result<Vec<BatchItem>, EngineError>;

    /// Open an interactive transaction.
    async fn start_transaction(
        &self,
        options: &TransactionOptions,
    ) -> Result<TransactionId, EngineError>;

    /// Commit an interactive transaction.
    async fn commit_transaction(&self, id: &TransactionId) -> Result<Value, EngineError>;

    /// Roll back an interactive transaction.
    async fn rollback_transaction(&self, id: &TransactionId) -> Result<Value, EngineError>;

    /// Release every resource held by the instance.
    ///
    /// Called exactly once by the owner. Later calls on the instance may fail.
    async fn dispose(&self);
}

/// A runnable engine artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineArtifact {
    /// A native executable on the local filesystem.
    Binary(PathBuf),
    /// An engine linked into the process; nothing to acquire.
    Embedded,
}

/// Acquires the engine artifact for a version, downloading it if needed.
#[async_trait]
pub trait EngineProvisioner: Send + Sync + 'static {
    async fn acquire(&self, version: &EngineVersion) -> Result<EngineArtifact, ArtifactError>;
}

/// Everything needed to construct an engine instance.
#[derive(Debug, Clone)]
pub struct EngineSpec {
    pub key: EngineKey,
    pub artifact: EngineArtifact,
    pub schema: Arc<str>,
}

/// Builds engine instances.
#[async_trait]
pub trait EngineFactory: Send + Sync + 'static {
    async fn create(&self, spec: EngineSpec) -> Result<Arc<dyn QueryEngine>, StartupError>;
}

/// External persistence for schema snapshots.
///
/// Lets a restarted gateway recover schemas instead of forcing every client
/// to upload them again.
#[async_trait]
pub trait SchemaStore: Send + Sync + 'static {
    /// The snapshot stored for the triple, if any.
    ///
    /// Read failures are reported as absence; implementations log them.
    async fn load(&self, key: &EngineKey) -> Option<String>;

    /// Persist the snapshot for the triple.
    async fn save(&self, key: &EngineKey, schema: &str) -> Result<(), SchemaStoreError>;
}
