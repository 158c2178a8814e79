use crate::engine::FakeEngine;
use crate::fixtures::INVALID_SCHEMA;
use accelerate_core::{
    ArtifactError, EngineArtifact, EngineFactory, EngineProvisioner, EngineSpec, QueryEngine,
    StartupError,
};
use accelerate_types::EngineVersion;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Provisioner that hands out [`EngineArtifact::Embedded`] and counts calls.
#[derive(Debug, Default)]
pub struct CountingProvisioner {
    acquisitions: AtomicUsize,
    delay: Option<Duration>,
    failure: Mutex<Option<String>>,
}

impl CountingProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every acquisition.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make subsequent acquisitions fail with `reason`, or succeed again with `None`.
    pub fn set_failure(&self, reason: Option<&str>) {
        *self.failure.lock() = reason.map(str::to_string);
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineProvisioner for CountingProvisioner {
    async fn acquire(&self, _version: &EngineVersion) -> Result<EngineArtifact, ArtifactError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failure.lock().clone();
        match failure {
            Some(reason) => Err(ArtifactError::NotFound(reason)),
            None => Ok(EngineArtifact::Embedded),
        }
    }
}

/// Factory producing [`FakeEngine`]s.
///
/// Rejects [`INVALID_SCHEMA`]. Keeps every engine it built so tests can
/// inspect them.
#[derive(Default)]
pub struct FakeEngineFactory {
    created: AtomicUsize,
    disposed: Arc<AtomicUsize>,
    engines: Mutex<Vec<Arc<FakeEngine>>>,
}

impl FakeEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Every engine built so far, oldest first.
    pub fn engines(&self) -> Vec<Arc<FakeEngine>> {
        self.engines.lock().clone()
    }

    pub fn last_engine(&self) -> Option<Arc<FakeEngine>> {
        self.engines.lock().last().cloned()
    }
}

#[async_trait]
impl EngineFactory for FakeEngineFactory {
    async fn create(&self, spec: EngineSpec) -> Result<Arc<dyn QueryEngine>, StartupError> {
        if spec.schema.as_ref() == INVALID_SCHEMA {
            return Err(StartupError::InvalidSchema(format!(
                "schema for {} does not parse",
                spec.key
            )));
        }
        let engine = Arc::new(FakeEngine::with_disposal_counter(Arc::clone(&self.disposed)));
        self.engines.lock().push(Arc::clone(&engine));
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(engine)
    }
}
