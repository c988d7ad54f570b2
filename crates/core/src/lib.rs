//! Pure domain logic for the forge dispatch engine.
//!
//! This crate has no internal dependencies so it can be shared by the
//! repository layer, the HTTP server, and the worker agent alike.

pub mod capabilities;
pub mod error;
pub mod hashing;
pub mod health;
pub mod log_levels;
pub mod node_keys;
pub mod node_pool;
pub mod roles;
pub mod submission;
pub mod types;
