//! Production wiring for the Accelerate gateway.
//!
//! - [`config`]: TOML server configuration
//! - [`engine`]: native `query-engine` processes and their on-disk artifacts
//! - [`http`]: axum routes over [`accelerate_gateway::Gateway`]
//! - [`schema_store`]: schema snapshots persisted to a directory
//! - [`telemetry`]: tracing subscriber setup

pub mod config;
pub mod engine;
pub mod http;
pub mod schema_store;
pub mod telemetry;

pub use config::{ConfigError, LogFormat, ServerConfig};
pub use engine::{BinaryEngineFactory, EngineDirectory};
pub use http::{router, ApiError};
pub use schema_store::FileSchemaStore;
pub use telemetry::init_tracing;
