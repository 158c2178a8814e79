//! HTTP transport.
//!
//! Maps routes onto [`Gateway`] operations and converts [`GatewayError`]
//! into a status and JSON body. This is the only place that happens.
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | POST | `/{version}/{hash}/graphql` | query or batch |
//! | POST | `/{version}/{hash}/transaction/start` | open transaction |
//! | POST | `/{version}/{hash}/itx/{id}/graphql` | query in transaction |
//! | POST | `/{version}/{hash}/itx/{id}/commit` | commit |
//! | POST | `/{version}/{hash}/itx/{id}/rollback` | rollback |
//! | PUT | `/{version}/{hash}/schema` | register schema |
//! | GET | `/health` | liveness |

use accelerate_core::RequestHeaders;
use accelerate_gateway::Gateway;
use accelerate_types::{GatewayError, SchemaHash, TransactionId, TransactionOptions};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// A gateway failure on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        debug!(status = status.as_u16(), error = %self.0, "Request failed");
        (status, Json(self.0.body())).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

/// Build the router.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/{version}/{hash}/graphql", post(query))
        .route("/{version}/{hash}/transaction/start", post(start_transaction))
        .route("/{version}/{hash}/itx/{id}/graphql", post(query_transaction))
        .route("/{version}/{hash}/itx/{id}/commit", post(commit_transaction))
        .route("/{version}/{hash}/itx/{id}/rollback", post(rollback_transaction))
        .route("/{version}/{hash}/schema", put(update_schema))
        .with_state(gateway)
}

fn request_headers(headers: &HeaderMap) -> RequestHeaders {
    RequestHeaders::from_pairs(
        headers
            .iter()
            .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?))),
    )
}

/// Bodies are read as text and parsed here, whatever the content type says.
fn parse_json(body: &str) -> Result<Value, ApiError> {
    serde_json::from_str(body)
        .map_err(|e| ApiError(GatewayError::BadRequest(format!("body is not JSON: {}", e))))
}

async fn health(State(gateway): State<Arc<Gateway>>) -> Json<Value> {
    Json(gateway.health())
}

async fn query(
    State(gateway): State<Arc<Gateway>>,
    Path((_version, hash)): Path<(String, String)>,
    headers: HeaderMap,
    body: String,
) -> ApiResult {
    let headers = request_headers(&headers);
    gateway.authorize(&headers).await?;
    let body = parse_json(&body)?;
    let result = gateway.query(&headers, &SchemaHash::new(hash), body).await?;
    Ok(Json(result))
}

async fn start_transaction(
    State(gateway): State<Arc<Gateway>>,
    Path((version, hash)): Path<(String, String)>,
    headers: HeaderMap,
    body: String,
) -> ApiResult {
    let headers = request_headers(&headers);
    gateway.authorize(&headers).await?;
    let options: TransactionOptions = if body.trim().is_empty() {
        TransactionOptions::default()
    } else {
        serde_json::from_str(&body).map_err(|e| {
            ApiError(GatewayError::BadRequest(format!(
                "invalid transaction options: {}",
                e
            )))
        })?
    };
    let started = gateway
        .start_transaction(
            &headers,
            &version,
            &SchemaHash::new(hash),
            &options,
        )
        .await?;
    Ok(Json(started.body()))
}

async fn query_transaction(
    State(gateway): State<Arc<Gateway>>,
    Path((_version, hash, id)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: String,
) -> ApiResult {
    let headers = request_headers(&headers);
    gateway.authorize(&headers).await?;
    let query = parse_json(&body)?;
    let result = gateway
        .query_transaction(
            &headers,
            &SchemaHash::new(hash),
            &TransactionId::new(id),
            query,
        )
        .await?;
    Ok(Json(result))
}

async fn commit_transaction(
    State(gateway): State<Arc<Gateway>>,
    Path((_version, hash, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult {
    let result = gateway
        .commit_transaction(
            &request_headers(&headers),
            &SchemaHash::new(hash),
            &TransactionId::new(id),
        )
        .await?;
    Ok(Json(result))
}

async fn rollback_transaction(
    State(gateway): State<Arc<Gateway>>,
    Path((_version, hash, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult {
    let result = gateway
        .rollback_transaction(
            &request_headers(&headers),
            &SchemaHash::new(hash),
            &TransactionId::new(id),
        )
        .await?;
    Ok(Json(result))
}

async fn update_schema(
    State(gateway): State<Arc<Gateway>>,
    Path((_version, hash)): Path<(String, String)>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, ApiError> {
    gateway
        .update_schema(&request_headers(&headers), &SchemaHash::new(hash), &body)
        .await?;
    Ok(StatusCode::OK)
}
