//! Gateway configuration.

use accelerate_auth::AuthMode;
use accelerate_engine::InstanceMode;
use accelerate_transactions::DEFAULT_IDLE_TIMEOUT;
use std::time::Duration;

/// Configuration for a [`crate::Gateway`].
///
/// Modes are enums rather than optional fields: exactly one credential mode
/// and one instance mode is active.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How requests are authenticated.
    pub auth: AuthMode,

    /// Whether engine instances are cached across requests.
    pub instance_mode: InstanceMode,

    /// Open transactions idle for longer than this are rolled back.
    pub transaction_idle_timeout: Duration,

    /// How often idle transactions are looked for.
    pub sweep_interval: Duration,

    /// Scheme of transaction continuation endpoints. TLS is terminated in
    /// front of the gateway, so this is usually `https` even though the
    /// gateway itself speaks plain HTTP.
    pub public_scheme: String,

    /// Host used in continuation endpoints when the request names none.
    pub fallback_host: String,
}

impl GatewayConfig {
    /// Configuration with the given credential mode and defaults for the rest.
    pub fn new(auth: AuthMode) -> Self {
        Self {
            auth,
            instance_mode: InstanceMode::Shared,
            transaction_idle_timeout: DEFAULT_IDLE_TIMEOUT,
            sweep_interval: Duration::from_secs(10),
            public_scheme: "https".to_string(),
            fallback_host: "localhost".to_string(),
        }
    }

    pub fn with_instance_mode(mut self, mode: InstanceMode) -> Self {
        self.instance_mode = mode;
        self
    }

    pub fn with_transaction_idle_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_idle_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_public_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.public_scheme = scheme.into();
        self
    }

    pub fn with_fallback_host(mut self, host: impl Into<String>) -> Self {
        self.fallback_host = host.into();
        self
    }
}
