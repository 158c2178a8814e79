//! Server configuration file.
//!
//! ```toml
//! listen = "0.0.0.0:4000"
//! secret = "change-me"
//! single_instance = false
//! transaction_idle_timeout_secs = 300
//! engines_dir = "/var/lib/accelerate/engines"
//! engine_mirror = "https://mirror.internal/query-engines"
//! schema_dir = "/var/lib/accelerate/schemas"
//! log_format = "json"
//! ```
//!
//! Exactly one credential mode must be configured: `secret` (signed tokens,
//! multi-tenant), or `datasource_url` with an optional `api_key`.

use accelerate_gateway::{AuthMode, GatewayConfig, InstanceMode};
use accelerate_types::DatasourceUrl;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server configuration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Signing secret; enables multi-tenant signed-token mode.
    #[serde(default)]
    pub secret: Option<String>,

    /// Static datasource for single-tenant modes.
    #[serde(default)]
    pub datasource_url: Option<String>,

    /// Shared API key required with a static datasource.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Build an engine per request instead of caching one per schema.
    #[serde(default)]
    pub single_instance: bool,

    /// Idle open transactions are rolled back after this many seconds.
    #[serde(default = "default_transaction_idle_timeout")]
    pub transaction_idle_timeout_secs: u64,

    /// Seconds between idle transaction sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Scheme of transaction continuation endpoints.
    #[serde(default = "default_public_scheme")]
    pub public_scheme: String,

    /// Directory holding `<version>/query-engine` executables.
    #[serde(default = "default_engines_dir")]
    pub engines_dir: PathBuf,

    /// Base URL engines are downloaded from when missing locally.
    #[serde(default)]
    pub engine_mirror: Option<String>,

    /// Platform segment of mirror download URLs.
    #[serde(default = "default_engine_platform")]
    pub engine_platform: String,

    /// Seconds to wait for a spawned engine to report ready.
    #[serde(default = "default_engine_startup_timeout")]
    pub engine_startup_timeout_secs: u64,

    /// Where schema snapshots are persisted. None keeps them in memory.
    #[serde(default)]
    pub schema_dir: Option<PathBuf>,

    /// Default log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_listen() -> String {
    "0.0.0.0:4000".to_string()
}

fn default_transaction_idle_timeout() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    10
}

fn default_public_scheme() -> String {
    "https".to_string()
}

fn default_engines_dir() -> PathBuf {
    PathBuf::from("engines")
}

fn default_engine_platform() -> String {
    "debian-openssl-3.0.x".to_string()
}

fn default_engine_startup_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            secret: None,
            datasource_url: None,
            api_key: None,
            single_instance: false,
            transaction_idle_timeout_secs: default_transaction_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            public_scheme: default_public_scheme(),
            engines_dir: default_engines_dir(),
            engine_mirror: None,
            engine_platform: default_engine_platform(),
            engine_startup_timeout_secs: default_engine_startup_timeout(),
            schema_dir: None,
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen", &self.listen)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field(
                "datasource_url",
                &self.datasource_url.as_ref().map(|u| DatasourceUrl::new(u.as_str())),
            )
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("single_instance", &self.single_instance)
            .field("transaction_idle_timeout_secs", &self.transaction_idle_timeout_secs)
            .field("engines_dir", &self.engines_dir)
            .field("engine_mirror", &self.engine_mirror)
            .field("schema_dir", &self.schema_dir)
            .field("log_format", &self.log_format)
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    /// Load from a TOML file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_toml()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// The credential mode this configuration selects.
    pub fn auth_mode(&self) -> Result<AuthMode, ConfigError> {
        match (&self.secret, &self.datasource_url, &self.api_key) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => Err(ConfigError::Invalid(
                "`secret` cannot be combined with `datasource_url` or `api_key`".to_string(),
            )),
            (Some(secret), None, None) if secret.is_empty() => {
                Err(ConfigError::Invalid("`secret` must not be empty".to_string()))
            }
            (Some(secret), None, None) => Ok(AuthMode::SignedToken {
                secret: secret.clone(),
            }),
            (None, Some(url), Some(key)) => Ok(AuthMode::ApiKey {
                datasource_url: DatasourceUrl::new(url.as_str()),
                api_key: key.clone(),
            }),
            (None, Some(url), None) => Ok(AuthMode::Static {
                datasource_url: DatasourceUrl::new(url.as_str()),
            }),
            (None, None, _) => Err(ConfigError::Invalid(
                "one of `secret` or `datasource_url` is required".to_string(),
            )),
        }
    }

    pub fn instance_mode(&self) -> InstanceMode {
        if self.single_instance {
            InstanceMode::SingleInstance
        } else {
            InstanceMode::Shared
        }
    }

    /// Gateway settings derived from this file.
    pub fn gateway_config(&self) -> Result<GatewayConfig, ConfigError> {
        if self.transaction_idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "`transaction_idle_timeout_secs` must be positive".to_string(),
            ));
        }
        Ok(GatewayConfig::new(self.auth_mode()?)
            .with_instance_mode(self.instance_mode())
            .with_transaction_idle_timeout(Duration::from_secs(self.transaction_idle_timeout_secs))
            .with_sweep_interval(Duration::from_secs(self.sweep_interval_secs.max(1)))
            .with_public_scheme(self.public_scheme.clone()))
    }

    pub fn engine_startup_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_startup_timeout_secs)
    }
}
