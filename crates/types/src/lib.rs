//! Core types for the Accelerate gateway.
//!
//! Identifiers naming engine instances and transactions, the options a
//! client can pass when opening a transaction, the error shape engines
//! report, and the gateway's own error taxonomy.

mod engine_error;
mod error;
mod identifiers;
mod transaction;

pub use engine_error::{error_envelope, EngineError, TRANSACTION_API_ERROR};
pub use error::{GatewayError, TransactionRejection};
pub use identifiers::{DatasourceUrl, EngineKey, EngineVersion, SchemaHash, TransactionId};
pub use transaction::{
    IsolationLevel, TransactionOptions, DEFAULT_MAX_WAIT_MS, DEFAULT_TIMEOUT_MS,
};
