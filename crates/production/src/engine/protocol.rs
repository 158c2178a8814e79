//! Query engine HTTP protocol payloads.
//!
//! The engine answers with status 200 for most failures and reports them in
//! the body:
//!
//! ```text
//! {"errors":[{"error":"...","user_facing_error":{"is_panic":false,"message":"...","meta":{},"error_code":"P2002"}}]}
//! ```
//!
//! Batches answer `{"batchResult":[...]}` where each item is either
//! `{"data":...}` or an `{"errors":[...]}` object of its own.

use accelerate_core::BatchItem;
use accelerate_types::EngineError;
use serde_json::Value;

/// Extract the first error of an `{"errors": [...]}` body, if it is one.
pub fn engine_error(body: &Value) -> Option<EngineError> {
    let first = body.get("errors")?.as_array()?.first()?;

    let Some(user_facing) = first.get("user_facing_error") else {
        let message = first
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("query engine error");
        return Some(EngineError::new(message));
    };

    let message = user_facing
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let mut err = match user_facing.get("error_code").and_then(Value::as_str) {
        Some(code) => EngineError::with_code(code, message),
        None => EngineError::new(message),
    };
    err.is_panic = user_facing
        .get("is_panic")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    err.meta = user_facing.get("meta").cloned().unwrap_or(Value::Null);
    err.batch_request_idx = user_facing
        .get("batch_request_idx")
        .and_then(Value::as_u64)
        .map(|idx| idx as usize);
    Some(err)
}

/// Turn a batch response into per-item results.
pub fn batch_items(body: Value) -> Result<Vec<BatchItem>, EngineError> {
    if let Some(err) = engine_error(&body) {
        return Err(err);
    }
    let Some(Value::Array(items)) = body.get("batchResult").cloned() else {
        return Err(EngineError::new("query engine returned a malformed batch response"));
    };
    Ok(items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| match engine_error(&item) {
            Some(err) if err.batch_request_idx.is_none() => Err(err.at_batch_index(idx)),
            Some(err) => Err(err),
            None => Ok(item),
        })
        .collect())
}
