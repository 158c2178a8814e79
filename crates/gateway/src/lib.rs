//! Request router for the Accelerate gateway.
//!
//! [`Gateway`] is the single entry point per inbound call. It ties together
//! the credential resolver, the engine instance cache and the transaction
//! tracker, and reports every failure as a [`accelerate_types::GatewayError`].
//!
//! # Example
//!
//! ```ignore
//! let gateway = Gateway::builder(config, provisioner, factory).build();
//! gateway.update_schema(&headers, &hash, schema).await?;
//! let result = gateway.query(&headers, &hash, query).await?;
//! ```

mod batch;
mod config;
mod gateway;

pub use config::GatewayConfig;
pub use gateway::{Gateway, GatewayBuilder, StartedTransaction};

pub use accelerate_auth::AuthMode;
pub use accelerate_engine::{InstanceMode, Registration};
