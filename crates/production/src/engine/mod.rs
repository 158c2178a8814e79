//! Native query engine integration.

mod binary;
mod directory;
mod protocol;

pub use binary::{BinaryEngine, BinaryEngineFactory};
pub use directory::EngineDirectory;
pub use protocol::{batch_items, engine_error};
