//! Node API-key authentication extractor.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use forge_db::models::node::Node;

use super::auth::bearer_token;
use crate::error::AppError;
use crate::state::AppState;

/// The active node whose API key was presented as a Bearer credential.
///
/// A deregistered node's key no longer resolves, so every node-protocol
/// call from it is rejected with 401.
#[derive(Debug, Clone)]
pub struct AuthNode(pub Node);

impl FromRequestParts<AppState> for AuthNode {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let key = bearer_token(parts)?;
        let node = state.engine.authenticate(key).await?;
        Ok(AuthNode(node))
    }
}
