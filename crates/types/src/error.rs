//! Gateway error taxonomy.
//!
//! Every failure a request can end with is a [`GatewayError`]. Components
//! return it as a plain value; the transport turns it into an HTTP status and
//! JSON body exactly once, using [`GatewayError::status_code`] and
//! [`GatewayError::body`].
//!
//! | Variant | Status | Body |
//! |---------|--------|------|
//! | `Unauthorized` | 401 | `{Unauthorized: {reason: InvalidKey}}` |
//! | `VersionMissing` | 404 | `{EngineNotStarted: {reason: VersionMissing}}` |
//! | `SchemaMissing` | 404 | `{EngineNotStarted: {reason: SchemaMissing}}` |
//! | `EngineMissing` | 404 | `{EngineNotStarted: {reason: EngineMissing}}` |
//! | `EngineStartup` | 500 | `{EngineNotStarted: {reason: EngineStartupError, message}}` |
//! | `Transaction` | 400 | `{errors: [...]}` with code `P2028` |
//! | `BadRequest` | 400 | `{errors: [...]}` |
//! | `Query` | 400, or 500 for panics/uncoded errors | `{errors: [...]}` |
//! | `PartialBatch` | 400 | `{batchResult: [...], errors: [...]}` |

use crate::engine_error::{error_envelope, EngineError, TRANSACTION_API_ERROR};
use crate::identifiers::{EngineKey, EngineVersion, TransactionId};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

/// Why a transaction handle was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionRejection {
    /// Never issued, already committed/rolled back, or expired.
    NotFound,
    /// Issued for a different (version, hash, datasource) triple.
    Mismatch,
    /// The engine instance that issued the handle is gone.
    Evicted,
}

impl fmt::Display for TransactionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionRejection::NotFound => {
                f.write_str("transaction not found, already closed or expired")
            }
            TransactionRejection::Mismatch => {
                f.write_str("transaction belongs to a different schema or datasource")
            }
            TransactionRejection::Evicted => {
                f.write_str("engine instance owning the transaction is no longer running")
            }
        }
    }
}

/// Errors terminating a gateway request.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Missing, malformed or forged credential.
    #[error("invalid credential")]
    Unauthorized,

    /// The engine version header is absent.
    #[error("engine version header missing")]
    VersionMissing,

    /// No engine instance and no recoverable schema snapshot for the triple.
    #[error("no schema registered for {0}")]
    SchemaMissing(EngineKey),

    /// The engine artifact for the version could not be acquired.
    #[error("engine artifact unavailable for version {0}")]
    EngineMissing(EngineVersion),

    /// The engine artifact exists but the instance failed to start.
    #[error("engine failed to start: {0}")]
    EngineStartup(String),

    /// The transaction handle cannot be used.
    #[error("transaction {id}: {reason}")]
    Transaction {
        id: TransactionId,
        reason: TransactionRejection,
    },

    /// The request body could not be understood.
    #[error("invalid request body: {0}")]
    BadRequest(String),

    /// The engine rejected the operation.
    #[error("query failed: {0}")]
    Query(EngineError),

    /// Some operations of a non-transactional batch failed.
    ///
    /// `results` keeps every item in request order; failed items hold their
    /// own error envelope.
    #[error("{} of {} batch operations failed", .errors.len(), .results.len())]
    PartialBatch {
        results: Vec<Value>,
        errors: Vec<EngineError>,
    },
}

impl GatewayError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Unauthorized => 401,
            GatewayError::VersionMissing
            | GatewayError::SchemaMissing(_)
            | GatewayError::EngineMissing(_) => 404,
            GatewayError::EngineStartup(_) => 500,
            GatewayError::Transaction { .. } | GatewayError::BadRequest(_) => 400,
            GatewayError::Query(err) => {
                if err.is_user_facing() {
                    400
                } else {
                    500
                }
            }
            GatewayError::PartialBatch { .. } => 400,
        }
    }

    /// JSON body for this error.
    pub fn body(&self) -> Value {
        match self {
            GatewayError::Unauthorized => json!({ "Unauthorized": { "reason": "InvalidKey" } }),
            GatewayError::VersionMissing => engine_not_started("VersionMissing"),
            GatewayError::SchemaMissing(_) => engine_not_started("SchemaMissing"),
            GatewayError::EngineMissing(_) => engine_not_started("EngineMissing"),
            GatewayError::EngineStartup(message) => json!({
                "EngineNotStarted": { "reason": "EngineStartupError", "message": message }
            }),
            GatewayError::Transaction { id, reason } => {
                let err = EngineError::with_code(
                    TRANSACTION_API_ERROR,
                    format!("Transaction API error: {}", reason),
                )
                .meta(json!({ "transaction_id": id.as_str() }));
                error_envelope([&err])
            }
            GatewayError::BadRequest(message) => {
                error_envelope([&EngineError::new(format!("Invalid request body: {}", message))])
            }
            GatewayError::Query(err) => error_envelope([err]),
            GatewayError::PartialBatch { results, errors } => {
                let mut body = error_envelope(errors);
                body["batchResult"] = Value::Array(results.clone());
                body
            }
        }
    }
}

fn engine_not_started(reason: &str) -> Value {
    json!({ "EngineNotStarted": { "reason": reason } })
}

impl From<EngineError> for GatewayError {
    fn from(err: EngineError) -> Self {
        GatewayError::Query(err)
    }
}
