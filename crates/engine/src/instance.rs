use accelerate_core::QueryEngine;
use accelerate_types::EngineKey;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// A provisioned engine bound to one (version, hash, datasource) triple.
///
/// `id` is unique per cache and distinguishes an instance from a later one
/// built for the same key after eviction.
pub struct EngineInstance {
    pub id: u64,
    pub key: EngineKey,
    pub engine: Arc<dyn QueryEngine>,
    pub created_at: Instant,
}

impl EngineInstance {
    pub fn new(id: u64, key: EngineKey, engine: Arc<dyn QueryEngine>) -> Self {
        Self {
            id,
            key,
            engine,
            created_at: Instant::now(),
        }
    }

    pub fn engine(&self) -> &dyn QueryEngine {
        self.engine.as_ref()
    }
}

impl fmt::Debug for EngineInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineInstance")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("age", &self.created_at.elapsed())
            .finish_non_exhaustive()
    }
}
