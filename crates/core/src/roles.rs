//! Operator role names carried in JWT claims.

/// Full operator access: node registration, request submission, cancellation.
pub const ROLE_ADMIN: &str = "admin";
