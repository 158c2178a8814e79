use accelerate_core::{SchemaStore, SchemaStoreError};
use accelerate_types::EngineKey;
use async_trait::async_trait;
use dashmap::DashMap;

/// Process-local schema snapshots.
///
/// Backs single-instance mode when nothing durable is configured. Snapshots
/// do not survive a restart.
#[derive(Debug, Default)]
pub struct MemorySchemaStore {
    schemas: DashMap<EngineKey, String>,
}

impl MemorySchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[async_trait]
impl SchemaStore for MemorySchemaStore {
    async fn load(&self, key: &EngineKey) -> Option<String> {
        self.schemas.get(key).map(|s| s.value().clone())
    }

    async fn save(&self, key: &EngineKey, schema: &str) -> Result<(), SchemaStoreError> {
        // Snapshots are immutable per hash; keep the first one.
        self.schemas
            .entry(key.clone())
            .or_insert_with(|| schema.to_string());
        Ok(())
    }
}
