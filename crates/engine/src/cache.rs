//! Engine instance cache.
//!
//! Maps an [`EngineKey`] to a provisioned [`EngineInstance`], or to the
//! provisioning still in flight for it.
//!
//! # Deduplication
//!
//! The first request for a key inserts a shared provisioning future under the
//! key while holding the map shard lock. Every later request for the key,
//! including ones arriving while provisioning runs, clones and awaits that
//! same future, so a key is provisioned at most once at a time:
//!
//! ```text
//! request A ──┐ entry(key) vacant → insert Shared(build) ──┐
//! request B ──┼─ entry(key) occupied → clone ──────────────┼─► one build
//! request C ──┘ entry(key) occupied → clone ──────────────┘
//! ```
//!
//! The future is spawned onto the runtime, so it completes even if every
//! waiter is cancelled. On failure it removes its own entry (matched by
//! generation) before any waiter sees the error, so the next request retries
//! from scratch.

use crate::error::ProvisionError;
use crate::instance::EngineInstance;
use crate::lease::EngineLease;
use crate::schema_store::MemorySchemaStore;
use accelerate_core::{EngineFactory, EngineProvisioner, EngineSpec, SchemaStore};
use accelerate_types::EngineKey;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Whether instances are cached across requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InstanceMode {
    /// One long-lived instance per key.
    #[default]
    Shared,
    /// Build an instance per operation and dispose it afterwards.
    SingleInstance,
}

/// Outcome of a schema registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// An instance already existed for the key; the submitted schema was ignored.
    Existing,
    /// A new instance was provisioned from the submitted schema.
    Provisioned,
    /// The snapshot was persisted for later per-request instances.
    Stored,
}

type ProvisionResult = Result<Arc<EngineInstance>, ProvisionError>;
type PendingInstance = Shared<BoxFuture<'static, ProvisionResult>>;

struct CacheEntry {
    generation: u64,
    instance: PendingInstance,
}

/// Builds instances from an artifact and a schema. Knows nothing of caching.
struct InstanceBuilder {
    provisioner: Arc<dyn EngineProvisioner>,
    factory: Arc<dyn EngineFactory>,
    next_id: AtomicU64,
}

impl InstanceBuilder {
    async fn build(&self, key: EngineKey, schema: Arc<str>) -> ProvisionResult {
        let artifact = self
            .provisioner
            .acquire(&key.version)
            .await
            .map_err(|e| ProvisionError::from_artifact(&key.version, e))?;

        let engine = self
            .factory
            .create(EngineSpec {
                key: key.clone(),
                artifact,
                schema,
            })
            .await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(EngineInstance::new(id, key, engine)))
    }
}

/// Keyed registry of engine instances.
///
/// Owned by whoever builds the gateway; there is no process-wide instance.
pub struct EngineCache {
    entries: Arc<DashMap<EngineKey, CacheEntry>>,
    builder: Arc<InstanceBuilder>,
    schema_store: Option<Arc<dyn SchemaStore>>,
    mode: InstanceMode,
    next_generation: AtomicU64,
}

impl EngineCache {
    /// Create an empty cache.
    ///
    /// Single-instance mode gets an in-memory schema store until
    /// [`EngineCache::with_schema_store`] replaces it, since it has nowhere
    /// else to keep submitted snapshots.
    pub fn new(
        provisioner: Arc<dyn EngineProvisioner>,
        factory: Arc<dyn EngineFactory>,
        mode: InstanceMode,
    ) -> Self {
        let schema_store: Option<Arc<dyn SchemaStore>> = match mode {
            InstanceMode::Shared => None,
            InstanceMode::SingleInstance => Some(Arc::new(MemorySchemaStore::new())),
        };
        Self {
            entries: Arc::new(DashMap::new()),
            builder: Arc::new(InstanceBuilder {
                provisioner,
                factory,
                next_id: AtomicU64::new(1),
            }),
            schema_store,
            mode,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Consult `store` for snapshots of keys with no live instance.
    pub fn with_schema_store(mut self, store: Arc<dyn SchemaStore>) -> Self {
        self.schema_store = Some(store);
        self
    }

    pub fn mode(&self) -> InstanceMode {
        self.mode
    }

    /// Number of keys with a live or in-flight instance.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &EngineKey) -> bool {
        self.entries.contains_key(key)
    }

    /// The ready instance for `key`, without waiting or provisioning.
    pub fn get(&self, key: &EngineKey) -> Option<Arc<EngineInstance>> {
        let entry = self.entries.get(key)?;
        match entry.instance.peek() {
            Some(Ok(instance)) => Some(Arc::clone(instance)),
            _ => None,
        }
    }

    /// Whether `instance` is the one currently cached under its key.
    pub fn is_current(&self, instance: &EngineInstance) -> bool {
        self.get(&instance.key)
            .is_some_and(|current| current.id == instance.id)
    }

    /// Find the instance for `key`.
    ///
    /// Waits for an in-flight provisioning if there is one. With no entry,
    /// falls back to the schema store and provisions from the recovered
    /// snapshot. In single-instance mode the result is a fresh instance that
    /// the caller must dispose.
    ///
    /// # Errors
    ///
    /// [`ProvisionError::SchemaMissing`] when nothing is cached and no
    /// snapshot can be recovered, or whatever provisioning reports.
    pub async fn resolve(&self, key: &EngineKey) -> ProvisionResult {
        if self.mode == InstanceMode::Shared {
            if let Some(pending) = self.pending(key) {
                return pending.await;
            }
        }

        let Some(store) = &self.schema_store else {
            return Err(ProvisionError::SchemaMissing(key.clone()));
        };
        match store.load(key).await {
            Some(schema) => {
                debug!(key = %key, "Recovered schema snapshot from store");
                self.provision(key, Arc::from(schema)).await
            }
            None => Err(ProvisionError::SchemaMissing(key.clone())),
        }
    }

    /// Provision an instance for `key` from `schema`.
    ///
    /// In shared mode an existing or in-flight entry wins and `schema` is
    /// ignored. In single-instance mode a detached instance is built and
    /// nothing is cached.
    pub async fn provision(&self, key: &EngineKey, schema: Arc<str>) -> ProvisionResult {
        if self.mode == InstanceMode::SingleInstance {
            return self.builder.build(key.clone(), schema).await;
        }

        let (pending, started) = match self.entries.entry(key.clone()) {
            Entry::Occupied(entry) => (entry.get().instance.clone(), false),
            Entry::Vacant(entry) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let pending = self.start_provisioning(key.clone(), schema, generation);
                entry.insert(CacheEntry {
                    generation,
                    instance: pending.clone(),
                });
                (pending, true)
            }
        };

        if started {
            tokio::spawn(pending.clone().map(|_| ()));
        }
        pending.await
    }

    /// Borrow an instance for one operation.
    ///
    /// The lease must be released once the operation is done; in
    /// single-instance mode that disposes the instance.
    pub async fn acquire(&self, key: &EngineKey) -> Result<EngineLease, ProvisionError> {
        let instance = self.resolve(key).await?;
        Ok(match self.mode {
            InstanceMode::Shared => EngineLease::shared(instance),
            InstanceMode::SingleInstance => EngineLease::owned(instance),
        })
    }

    /// Register a schema snapshot for `key`.
    ///
    /// Shared mode provisions an instance unless one exists already, then
    /// persists the snapshot if a store is configured. Single-instance mode
    /// only persists.
    pub async fn register_schema(
        &self,
        key: &EngineKey,
        schema: &str,
    ) -> Result<Registration, ProvisionError> {
        match self.mode {
            InstanceMode::SingleInstance => {
                let Some(store) = &self.schema_store else {
                    return Err(ProvisionError::SchemaStore(
                        "no schema store configured".to_string(),
                    ));
                };
                store
                    .save(key, schema)
                    .await
                    .map_err(|e| ProvisionError::SchemaStore(e.to_string()))?;
                debug!(key = %key, "Stored schema snapshot");
                Ok(Registration::Stored)
            }
            InstanceMode::Shared => {
                if let Some(pending) = self.pending(key) {
                    pending.await?;
                    debug!(key = %key, "Schema already registered");
                    return Ok(Registration::Existing);
                }

                self.provision(key, Arc::from(schema)).await?;
                if let Some(store) = &self.schema_store {
                    if let Err(e) = store.save(key, schema).await {
                        warn!(key = %key, error = %e, "Failed to persist schema snapshot");
                    }
                }
                Ok(Registration::Provisioned)
            }
        }
    }

    /// Drop the entry for `key` and dispose its instance.
    ///
    /// Returns whether there was an entry. An in-flight provisioning is
    /// awaited so its instance does not leak.
    pub async fn evict(&self, key: &EngineKey) -> bool {
        let Some((_, entry)) = self.entries.remove(key) else {
            return false;
        };
        if let Ok(instance) = entry.instance.await {
            info!(key = %key, instance = instance.id, "Evicting engine instance");
            instance.engine.dispose().await;
        }
        true
    }

    /// Evict every entry.
    pub async fn shutdown(&self) {
        let keys: Vec<EngineKey> = self.entries.iter().map(|e| e.key().clone()).collect();
        info!(count = keys.len(), "Shutting down engine instances");
        for key in keys {
            self.evict(&key).await;
        }
    }

    fn pending(&self, key: &EngineKey) -> Option<PendingInstance> {
        self.entries.get(key).map(|entry| entry.instance.clone())
    }

    fn start_provisioning(
        &self,
        key: EngineKey,
        schema: Arc<str>,
        generation: u64,
    ) -> PendingInstance {
        let builder = Arc::clone(&self.builder);
        let entries = Arc::clone(&self.entries);

        async move {
            info!(key = %key, "Provisioning engine instance");
            let result = builder.build(key.clone(), schema).await;
            match &result {
                Ok(instance) => {
                    info!(key = %key, instance = instance.id, "Engine instance ready");
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Provisioning failed, dropping cache entry");
                    entries.remove_if(&key, |_, entry| entry.generation == generation);
                }
            }
            result
        }
        .boxed()
        .shared()
    }
}

impl fmt::Debug for EngineCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineCache")
            .field("mode", &self.mode)
            .field("entries", &self.entries.len())
            .field("schema_store", &self.schema_store.is_some())
            .finish()
    }
}
