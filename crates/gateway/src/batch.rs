//! Batch request parsing and response shaping.

use accelerate_core::{BatchItem, BatchRequest, BatchTransaction};
use accelerate_types::{EngineError, GatewayError};
use serde_json::{json, Value};

/// The batch carried by a request body, if it has one.
///
/// A body is a batch when it has a `batch` field. `transaction` may be
/// absent, `null` or an object with an optional `isolationLevel`.
pub(crate) fn parse_batch(body: &Value) -> Result<Option<BatchRequest>, GatewayError> {
    let Some(batch) = body.get("batch") else {
        return Ok(None);
    };
    let queries = batch
        .as_array()
        .cloned()
        .ok_or_else(|| GatewayError::BadRequest("`batch` must be an array".to_string()))?;

    let transaction = match body.get("transaction") {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            serde_json::from_value::<BatchTransaction>(value.clone())
                .map_err(|e| GatewayError::BadRequest(format!("invalid `transaction`: {}", e)))?,
        ),
    };

    Ok(Some(BatchRequest {
        queries,
        transaction,
    }))
}

/// Shape engine batch results for the client.
///
/// All successes give `{batchResult, extensions}` with each item unwrapped
/// from its `data` field. Any failure gives [`GatewayError::PartialBatch`]
/// with the failed slots replaced by their error envelope.
pub(crate) fn batch_response(items: Vec<BatchItem>) -> Result<Value, GatewayError> {
    let mut results = Vec::with_capacity(items.len());
    let mut errors: Vec<EngineError> = Vec::new();

    for (idx, item) in items.into_iter().enumerate() {
        match item {
            Ok(value) => results.push(unwrap_data(value)),
            Err(mut err) => {
                err.batch_request_idx.get_or_insert(idx);
                results.push(json!({ "errors": [err.to_envelope_entry()] }));
                errors.push(err);
            }
        }
    }

    if !errors.is_empty() {
        return Err(GatewayError::PartialBatch { results, errors });
    }
    Ok(json!({
        "batchResult": results,
        "extensions": { "traces": [], "logs": [] },
    }))
}

fn unwrap_data(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}
