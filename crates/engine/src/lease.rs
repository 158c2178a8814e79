//! Scoped access to an engine instance.

use crate::instance::EngineInstance;
use accelerate_core::QueryEngine;
use std::sync::Arc;
use tracing::{debug, warn};

/// An engine instance borrowed for the duration of one operation.
///
/// Shared-mode leases point at a cached instance and releasing them does
/// nothing. Single-instance leases own their instance and dispose it on
/// [`EngineLease::release`], or from `Drop` if the holder never got that far.
pub struct EngineLease {
    instance: Arc<EngineInstance>,
    dispose_on_release: bool,
    released: bool,
}

impl EngineLease {
    pub(crate) fn shared(instance: Arc<EngineInstance>) -> Self {
        Self {
            instance,
            dispose_on_release: false,
            released: false,
        }
    }

    pub(crate) fn owned(instance: Arc<EngineInstance>) -> Self {
        Self {
            instance,
            dispose_on_release: true,
            released: false,
        }
    }

    pub fn instance(&self) -> &Arc<EngineInstance> {
        &self.instance
    }

    pub fn engine(&self) -> &dyn QueryEngine {
        self.instance.engine()
    }

    /// Whether releasing this lease disposes the instance.
    pub fn is_owned(&self) -> bool {
        self.dispose_on_release
    }

    /// End the lease, disposing the instance if the lease owns it.
    pub async fn release(mut self) {
        self.released = true;
        if self.dispose_on_release {
            debug!(instance = self.instance.id, key = %self.instance.key, "Disposing leased instance");
            self.instance.engine.dispose().await;
        }
    }

    /// Give up the lease without disposing.
    ///
    /// Returns the instance and whether the caller now owns it (and must
    /// dispose it eventually).
    pub fn into_parts(mut self) -> (Arc<EngineInstance>, bool) {
        self.released = true;
        (Arc::clone(&self.instance), self.dispose_on_release)
    }
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        if self.released || !self.dispose_on_release {
            return;
        }
        let instance = Arc::clone(&self.instance);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    instance.engine.dispose().await;
                });
            }
            Err(_) => {
                warn!(instance = instance.id, "Lease dropped outside a runtime, instance not disposed");
            }
        }
    }
}
