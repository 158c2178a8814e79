use accelerate_types::{EngineError, GatewayError, TransactionId, TransactionRejection};
use thiserror::Error;

/// Errors from transaction operations.
#[derive(Debug, Clone, Error)]
pub enum TrackerError {
    /// The handle was refused before reaching any engine.
    #[error("Transaction {id} rejected: {reason}")]
    Rejected {
        id: TransactionId,
        reason: TransactionRejection,
    },

    /// The engine issued a handle that is already tracked.
    #[error("Engine issued duplicate transaction id {0}")]
    Duplicate(TransactionId),

    /// The engine failed the operation.
    #[error("Engine error: {0}")]
    Engine(EngineError),
}

impl TrackerError {
    pub(crate) fn rejected(id: &TransactionId, reason: TransactionRejection) -> Self {
        TrackerError::Rejected {
            id: id.clone(),
            reason,
        }
    }
}

impl From<EngineError> for TrackerError {
    fn from(err: EngineError) -> Self {
        TrackerError::Engine(err)
    }
}

impl From<TrackerError> for GatewayError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::Rejected { id, reason } => GatewayError::Transaction { id, reason },
            TrackerError::Duplicate(id) => GatewayError::EngineStartup(format!(
                "engine issued duplicate transaction id {}",
                id
            )),
            TrackerError::Engine(e) => GatewayError::Query(e),
        }
    }
}
