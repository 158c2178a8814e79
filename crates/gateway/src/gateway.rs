//! Request facade.
//!
//! One method per externally visible operation. Each runs the same steps:
//!
//! 1. Resolve the datasource from the credential ([`GatewayError::Unauthorized`])
//! 2. Read the engine version header ([`GatewayError::VersionMissing`])
//! 3. Resolve or provision the engine instance (`EngineNotStarted` variants)
//! 4. Run the operation and fold engine failures into [`GatewayError::Query`]
//! 5. Release the instance lease, success or not
//!
//! Nothing here knows about HTTP; the transport maps [`GatewayError`] to a
//! status and body once.

use crate::batch::{batch_response, parse_batch};
use crate::config::GatewayConfig;
use accelerate_auth::CredentialResolver;
use accelerate_core::{EngineFactory, EngineProvisioner, RequestHeaders, SchemaStore};
use accelerate_engine::{EngineCache, EngineLease, InstanceMode, Registration};
use accelerate_transactions::{continuation_endpoint, TransactionTracker};
use accelerate_types::{EngineKey, GatewayError, SchemaHash, TransactionId, TransactionOptions};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A freshly opened interactive transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedTransaction {
    pub id: TransactionId,
    /// Where the client sends follow-up calls for this transaction.
    pub endpoint: String,
}

impl StartedTransaction {
    /// Response body for the transaction-start call.
    pub fn body(&self) -> Value {
        json!({
            "id": self.id,
            "extensions": {},
            "data-proxy": { "endpoint": self.endpoint },
        })
    }
}

/// Builds a [`Gateway`].
pub struct GatewayBuilder {
    config: GatewayConfig,
    provisioner: Arc<dyn EngineProvisioner>,
    factory: Arc<dyn EngineFactory>,
    schema_store: Option<Arc<dyn SchemaStore>>,
}

impl GatewayBuilder {
    /// Persist schema snapshots to `store` and recover them from it.
    pub fn schema_store(mut self, store: Arc<dyn SchemaStore>) -> Self {
        self.schema_store = Some(store);
        self
    }

    pub fn build(self) -> Gateway {
        let mut cache = EngineCache::new(self.provisioner, self.factory, self.config.instance_mode);
        if let Some(store) = self.schema_store {
            cache = cache.with_schema_store(store);
        }
        let cache = Arc::new(cache);
        let tracker = Arc::new(TransactionTracker::new(
            Arc::clone(&cache),
            self.config.transaction_idle_timeout,
        ));

        info!(
            auth = ?self.config.auth,
            instance_mode = ?self.config.instance_mode,
            idle_timeout = ?self.config.transaction_idle_timeout,
            "Gateway configured"
        );

        Gateway {
            resolver: CredentialResolver::new(self.config.auth.clone()),
            config: self.config,
            cache,
            tracker,
        }
    }
}

/// The gateway: credential resolution, instance routing and transaction
/// bookkeeping behind one call per operation.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct Gateway {
    config: GatewayConfig,
    resolver: CredentialResolver,
    cache: Arc<EngineCache>,
    tracker: Arc<TransactionTracker>,
}

impl Gateway {
    pub fn builder(
        config: GatewayConfig,
        provisioner: Arc<dyn EngineProvisioner>,
        factory: Arc<dyn EngineFactory>,
    ) -> GatewayBuilder {
        GatewayBuilder {
            config,
            provisioner,
            factory,
            schema_store: None,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<EngineCache> {
        &self.cache
    }

    pub fn tracker(&self) -> &Arc<TransactionTracker> {
        &self.tracker
    }

    /// Check the request's credential without touching any engine.
    ///
    /// Transports call this before decoding a body, so a request without a
    /// valid credential is refused as [`GatewayError::Unauthorized`] whatever
    /// it carries. The operations below check again on their own.
    pub async fn authorize(&self, headers: &RequestHeaders) -> Result<(), GatewayError> {
        self.resolver.resolve(headers).await.map(|_| ())
    }

    /// Run a single query, or a batch when the body has a `batch` field.
    pub async fn query(
        &self,
        headers: &RequestHeaders,
        hash: &SchemaHash,
        body: Value,
    ) -> Result<Value, GatewayError> {
        let key = self.engine_key(headers, hash).await?;
        let batch = parse_batch(&body)?;
        let lease = self.cache.acquire(&key).await?;

        let result = match batch {
            Some(batch) => {
                debug!(
                    key = %key,
                    size = batch.queries.len(),
                    transactional = batch.is_transactional(),
                    "Running batch"
                );
                match lease.engine().request_batch(batch).await {
                    Ok(items) => batch_response(items),
                    Err(e) => Err(GatewayError::Query(e)),
                }
            }
            None => lease
                .engine()
                .request(body, None)
                .await
                .map_err(GatewayError::Query),
        };

        lease.release().await;
        result
    }

    /// Open an interactive transaction.
    ///
    /// `client_version` is the version segment of the request path; the
    /// continuation endpoint repeats it.
    pub async fn start_transaction(
        &self,
        headers: &RequestHeaders,
        client_version: &str,
        hash: &SchemaHash,
        options: &TransactionOptions,
    ) -> Result<StartedTransaction, GatewayError> {
        let key = self.engine_key(headers, hash).await?;
        let lease: EngineLease = self.cache.acquire(&key).await?;
        let id = self.tracker.start(&key, lease, options).await?;

        let host = headers
            .public_host()
            .unwrap_or(self.config.fallback_host.as_str());
        let endpoint =
            continuation_endpoint(&self.config.public_scheme, host, client_version, hash, &id);
        info!(tx_id = %id, key = %key, "Interactive transaction opened");

        Ok(StartedTransaction { id, endpoint })
    }

    /// Run a query inside transaction `id`.
    pub async fn query_transaction(
        &self,
        headers: &RequestHeaders,
        hash: &SchemaHash,
        id: &TransactionId,
        query: Value,
    ) -> Result<Value, GatewayError> {
        let key = self.transaction_key(headers, hash).await?;
        Ok(self.tracker.query(&key, id, query).await?)
    }

    pub async fn commit_transaction(
        &self,
        headers: &RequestHeaders,
        hash: &SchemaHash,
        id: &TransactionId,
    ) -> Result<Value, GatewayError> {
        let key = self.transaction_key(headers, hash).await?;
        Ok(self.tracker.commit(&key, id).await?)
    }

    pub async fn rollback_transaction(
        &self,
        headers: &RequestHeaders,
        hash: &SchemaHash,
        id: &TransactionId,
    ) -> Result<Value, GatewayError> {
        let key = self.transaction_key(headers, hash).await?;
        Ok(self.tracker.rollback(&key, id).await?)
    }

    /// Register a schema snapshot for the request's triple.
    ///
    /// A no-op when an instance already exists; the submitted schema is then
    /// ignored.
    pub async fn update_schema(
        &self,
        headers: &RequestHeaders,
        hash: &SchemaHash,
        schema: &str,
    ) -> Result<Registration, GatewayError> {
        let key = self.engine_key(headers, hash).await?;
        let registration = self.cache.register_schema(&key, schema).await?;
        debug!(key = %key, ?registration, "Schema update");
        Ok(registration)
    }

    /// Liveness summary.
    pub fn health(&self) -> Value {
        json!({
            "status": "ok",
            "engines": self.cache.len(),
            "transactions": self.tracker.len(),
        })
    }

    /// Start rolling back idle transactions in the background.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        self.tracker.spawn_sweeper(self.config.sweep_interval)
    }

    /// Roll back open transactions and dispose every instance.
    pub async fn shutdown(&self) {
        self.tracker.shutdown().await;
        self.cache.shutdown().await;
    }

    async fn engine_key(
        &self,
        headers: &RequestHeaders,
        hash: &SchemaHash,
    ) -> Result<EngineKey, GatewayError> {
        let datasource = self.resolver.resolve(headers).await?;
        let version = headers.engine_version()?;
        Ok(EngineKey::new(version, hash.clone(), datasource))
    }

    /// Key for a call on an open transaction.
    ///
    /// In shared mode the instance must still resolve for the triple, so an
    /// unknown schema reports `SchemaMissing` like a plain query. Pinned
    /// single-instance transactions need no lookup.
    async fn transaction_key(
        &self,
        headers: &RequestHeaders,
        hash: &SchemaHash,
    ) -> Result<EngineKey, GatewayError> {
        let key = self.engine_key(headers, hash).await?;
        if self.cache.mode() == InstanceMode::Shared {
            self.cache.resolve(&key).await?;
        }
        Ok(key)
    }
}
