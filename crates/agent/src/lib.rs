//! `forge-agent` library crate.
//!
//! The reference node process: heartbeat, poll, execute, log, complete.
//! The binary entrypoint lives in `main.rs`.

pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod protocol;
pub mod worker;
