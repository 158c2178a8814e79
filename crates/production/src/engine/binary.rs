//! Query engine running as a child process.
//!
//! Each instance is one `query-engine` process listening on a loopback port.
//! The schema and datasource are handed over in the environment (both
//! base64, as the engine expects), and every operation is an HTTP call:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | query | `POST /` with the query, `X-transaction-id` inside a transaction |
//! | batch | `POST /` with `{batch, transaction}` |
//! | start | `POST /transaction/start` |
//! | commit | `POST /transaction/{id}/commit` |
//! | rollback | `POST /transaction/{id}/rollback` |
//! | readiness | `GET /status` |

use super::protocol::{batch_items, engine_error};
use accelerate_core::{
    BatchItem, BatchRequest, EngineArtifact, EngineFactory, EngineSpec, QueryEngine, StartupError,
};
use accelerate_types::{DatasourceUrl, EngineError, TransactionId, TransactionOptions};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const TRANSACTION_HEADER: &str = "X-transaction-id";
const READINESS_POLL: Duration = Duration::from_millis(100);

/// Spawns a `query-engine` process per instance.
#[derive(Debug, Clone)]
pub struct BinaryEngineFactory {
    client: reqwest::Client,
    startup_timeout: Duration,
}

impl BinaryEngineFactory {
    pub fn new(startup_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            startup_timeout,
        }
    }
}

#[async_trait]
impl EngineFactory for BinaryEngineFactory {
    async fn create(&self, spec: EngineSpec) -> Result<Arc<dyn QueryEngine>, StartupError> {
        let EngineArtifact::Binary(path) = &spec.artifact else {
            return Err(StartupError::UnsupportedArtifact(
                "embedded engines are not available in this build".to_string(),
            ));
        };

        let port = free_port().map_err(|e| StartupError::Process(e.to_string()))?;
        let mut child = spawn_engine(path, port, &spec.schema, &spec.key.datasource)?;
        let base_url = format!("http://127.0.0.1:{}", port);

        if let Err(e) = wait_ready(&self.client, &base_url, &mut child, self.startup_timeout).await {
            if let Err(kill_err) = child.start_kill() {
                debug!(error = %kill_err, "Failed to stop query engine after failed startup");
            }
            return Err(e);
        }
        info!(key = %spec.key, port, "Query engine process ready");

        Ok(Arc::new(BinaryEngine {
            client: self.client.clone(),
            base_url,
            child: Mutex::new(Some(child)),
        }))
    }
}

/// Base64 of the schema. Clients may already send it encoded.
fn encode_schema(schema: &str) -> String {
    let trimmed = schema.trim();
    match STANDARD.decode(trimmed) {
        Ok(bytes) if std::str::from_utf8(&bytes).is_ok() => trimmed.to_string(),
        _ => STANDARD.encode(schema),
    }
}

fn datasource_overrides(datasource: &DatasourceUrl) -> String {
    let overrides = json!([{ "name": "db", "url": datasource.expose() }]);
    STANDARD.encode(overrides.to_string())
}

fn spawn_engine(
    path: &Path,
    port: u16,
    schema: &str,
    datasource: &DatasourceUrl,
) -> Result<Child, StartupError> {
    Command::new(path)
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg(port.to_string())
        .arg("--engine-protocol")
        .arg("json")
        .arg("--enable-raw-queries")
        .env("PRISMA_DML", encode_schema(schema))
        .env("OVERWRITE_DATASOURCES", datasource_overrides(datasource))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| StartupError::Process(format!("{}: {}", path.display(), e)))
}

fn free_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

async fn wait_ready(
    client: &reqwest::Client,
    base_url: &str,
    child: &mut Child,
    timeout: Duration,
) -> Result<(), StartupError> {
    let deadline = Instant::now() + timeout;
    let status_url = format!("{}/status", base_url);

    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|e| StartupError::Process(e.to_string()))?
        {
            return Err(StartupError::Process(format!(
                "query engine exited during startup with {}",
                status
            )));
        }

        match client.get(&status_url).send().await {
            Ok(response) if response.status().is_success() => return Ok(()),
            Ok(response) => debug!(status = %response.status(), "Query engine not ready"),
            Err(e) => debug!(error = %e, "Query engine not reachable yet"),
        }

        if Instant::now() >= deadline {
            return Err(StartupError::Process(format!(
                "query engine not ready after {:?}",
                timeout
            )));
        }
        tokio::time::sleep(READINESS_POLL).await;
    }
}

/// A running `query-engine` process.
pub struct BinaryEngine {
    client: reqwest::Client,
    base_url: String,
    child: Mutex<Option<Child>>,
}

impl BinaryEngine {
    async fn post(
        &self,
        path: &str,
        body: &Value,
        transaction: Option<&TransactionId>,
    ) -> Result<Value, EngineError> {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body);
        if let Some(id) = transaction {
            request = request.header(TRANSACTION_HEADER, id.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::new(format!("query engine unreachable: {}", e)))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| EngineError::new(format!("invalid query engine response: {}", e)))?;

        if let Some(err) = engine_error(&body) {
            return Err(err);
        }
        if !status.is_success() {
            return Err(EngineError::new(format!(
                "query engine answered {}",
                status
            )));
        }
        Ok(body)
    }
}

#[async_trait]
impl QueryEngine for BinaryEngine {
    async fn request(
        &self,
        query: Value,
        transaction: Option<&TransactionId>,
    ) -> Result<Value, EngineError> {
        self.post("/", &query, transaction).await
    }

    async fn request_batch(&self, batch: BatchRequest) -> Result<Vec<BatchItem>, EngineError> {
        let body = json!({
            "batch": batch.queries,
            "transaction": batch.transaction,
        });
        batch_items(self.post("/", &body, None).await?)
    }

    async fn start_transaction(
        &self,
        options: &TransactionOptions,
    ) -> Result<TransactionId, EngineError> {
        let body = serde_json::to_value(options)
            .map_err(|e| EngineError::new(format!("invalid transaction options: {}", e)))?;
        let response = self.post("/transaction/start", &body, None).await?;
        response
            .get("id")
            .and_then(Value::as_str)
            .map(TransactionId::new)
            .ok_or_else(|| EngineError::new("query engine returned no transaction id"))
    }

    async fn commit_transaction(&self, id: &TransactionId) -> Result<Value, EngineError> {
        self.post(&format!("/transaction/{}/commit", id), &json!({}), None)
            .await
    }

    async fn rollback_transaction(&self, id: &TransactionId) -> Result<Value, EngineError> {
        self.post(&format!("/transaction/{}/rollback", id), &json!({}), None)
            .await
    }

    async fn dispose(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        if let Err(e) = child.kill().await {
            warn!(error = %e, "Failed to stop query engine process");
        }
    }
}
