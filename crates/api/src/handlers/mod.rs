//! HTTP handlers, grouped by audience.
//!
//! - [`node_protocol`] -- calls made by nodes with their API key.
//! - [`nodes`], [`requests`], [`runs`] -- operator (admin JWT) endpoints.

pub mod node_protocol;
pub mod nodes;
pub mod requests;
pub mod runs;
