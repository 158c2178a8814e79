//! Interactive transaction tracking.
//!
//! An interactive transaction spans several stateless HTTP calls. The
//! [`TransactionTracker`] remembers, for every open handle, which engine
//! instance issued it and for which (version, hash, datasource) triple, so
//! later calls can be routed back to that instance or refused.

mod endpoint;
mod error;
mod tracker;

pub use endpoint::continuation_endpoint;
pub use error::TrackerError;
pub use tracker::{TransactionTracker, DEFAULT_IDLE_TIMEOUT};
