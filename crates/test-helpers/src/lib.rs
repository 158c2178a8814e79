//! Test helpers for the Accelerate gateway.
//!
//! - [`FakeEngine`]: in-memory query engine speaking enough of the JSON
//!   protocol for gateway tests (create, find, delete, a unique `email`
//!   column, interactive transactions, batches)
//! - [`FakeEngineFactory`]: builds fake engines and counts creates/disposes
//! - [`CountingProvisioner`]: counts artifact acquisitions, with optional
//!   delay and failure injection
//! - [`fixtures`]: keys, schemas and query payloads

mod engine;
mod factory;
pub mod fixtures;

pub use engine::FakeEngine;
pub use factory::{CountingProvisioner, FakeEngineFactory};
