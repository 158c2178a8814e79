//! Errors reported by a query engine while executing client operations.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Error code used for interactive transaction API failures.
pub const TRANSACTION_API_ERROR: &str = "P2028";

/// A user-facing error produced by the query engine.
///
/// This is what the engine tells the client about a failed query. It is
/// passed through to the client in the error envelope; no stack traces or
/// engine internals beyond `message`/`code`/`meta` are ever attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineError {
    /// Human readable message.
    pub message: String,
    /// Engine error code (e.g. `P2002` for unique constraint violations).
    #[serde(default, rename = "error_code")]
    pub code: Option<String>,
    /// Structured details (e.g. the violated constraint's target columns).
    #[serde(default)]
    pub meta: Value,
    /// Whether the engine crashed while handling the request.
    #[serde(default)]
    pub is_panic: bool,
    /// Position of the failing operation inside a batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_request_idx: Option<usize>,
}

impl EngineError {
    /// Create an error without a code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            meta: Value::Null,
            is_panic: false,
            batch_request_idx: None,
        }
    }

    /// Create an error carrying an engine error code.
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Self::new(message)
        }
    }

    /// An engine crash.
    pub fn panic(message: impl Into<String>) -> Self {
        Self {
            is_panic: true,
            ..Self::new(message)
        }
    }

    /// Attach structured metadata.
    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    /// Tag the error with its position in a batch.
    pub fn at_batch_index(mut self, idx: usize) -> Self {
        self.batch_request_idx = Some(idx);
        self
    }

    /// Whether the error is the client's fault rather than the engine's.
    pub fn is_user_facing(&self) -> bool {
        !self.is_panic && self.code.is_some()
    }

    /// One entry of the `errors` array returned to clients.
    pub fn to_envelope_entry(&self) -> Value {
        let mut user_facing = json!({
            "is_panic": self.is_panic,
            "message": self.message,
            "meta": self.meta,
        });
        if let Some(code) = &self.code {
            user_facing["error_code"] = json!(code);
        }
        if let Some(idx) = self.batch_request_idx {
            user_facing["batch_request_idx"] = json!(idx);
        }
        json!({
            "error": self.to_string(),
            "user_facing_error": user_facing,
        })
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{}: {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for EngineError {}

/// Wrap engine errors into the `{errors: [...]}` envelope.
pub fn error_envelope<'a>(errors: impl IntoIterator<Item = &'a EngineError>) -> Value {
    let entries: Vec<Value> = errors
        .into_iter()
        .map(EngineError::to_envelope_entry)
        .collect();
    json!({ "errors": entries })
}
