//! Dispatch engine: node registry, claim dispatcher, run tracker, and log
//! sink over a pluggable [`DispatchStore`](forge_db::store::DispatchStore).

pub mod dispatch;
pub mod fleet;
pub mod outcome;

pub use dispatch::DispatchEngine;
