//! Collaborator traits and request model for the Accelerate gateway.
//!
//! The gateway does not execute queries itself. It decides which engine
//! instance serves a request and forwards the operation through the traits
//! defined here. Transports hand it a [`RequestHeaders`] extracted from the
//! inbound call.

mod error;
mod request;
mod traits;

pub use error::{ArtifactError, SchemaStoreError, StartupError};
pub use request::{
    RequestHeaders, AUTHORIZATION_HEADER, ENGINE_VERSION_HEADER, FORWARDED_HOST_HEADER,
    HOST_HEADER,
};
pub use traits::{
    BatchItem, BatchRequest, BatchTransaction, EngineArtifact, EngineFactory, EngineProvisioner,
    EngineSpec, QueryEngine, SchemaStore,
};
