//! A complete encounter node
//!
//! `EncounterEngine` is the synchronous core (identity, aggregation, bloom
//! windows) and can be driven directly in tests. `NodeRuntime` wraps it with a
//! transport, an optional backend and a tokio event loop.

mod engine;
mod runtime;

pub use engine::{EncounterEngine, EngineStats, TickReport};
pub use runtime::{NodeCommand, NodeEvent, NodeHandle, NodeRuntime};
