//! Operator authentication primitives.
//!
//! - [`jwt`] -- HS256 access-token generation and validation for operators.
//!
//! Nodes do not use JWTs; they present their API key, resolved by
//! [`crate::middleware::node_auth::AuthNode`].

pub mod jwt;
