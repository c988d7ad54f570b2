//! Authentication and authorization extractors.
//!
//! - [`auth::AuthUser`] -- Extracts the operator from a JWT Bearer token.
//! - [`rbac::RequireAdmin`] -- Requires the `admin` role.
//! - [`node_auth::AuthNode`] -- Resolves a node API key to its active node.

pub mod auth;
pub mod node_auth;
pub mod rbac;
