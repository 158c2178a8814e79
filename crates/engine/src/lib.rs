//! Engine instance management.
//!
//! [`EngineCache`] decides which engine instance serves a
//! (version, hash, datasource) triple, provisioning it at most once.
//! [`EngineLease`] scopes an instance to one operation.

mod cache;
mod error;
mod instance;
mod lease;
mod schema_store;

pub use cache::{EngineCache, InstanceMode, Registration};
pub use error::ProvisionError;
pub use instance::EngineInstance;
pub use lease::EngineLease;
pub use schema_store::MemorySchemaStore;
