use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use super::{repo_types::User, services::resolve_token};
use crate::{error::AppError, state::AppState};

/// Resolves the bearer token to the calling user.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // Read Authorization header
        let auth = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthenticated("Authentication credentials were not provided.".into())
            })?;

        // "Bearer <key>" or "Token <key>"
        let key = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("Token "))
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::Unauthenticated("Invalid token header.".into()))?;

        let user = resolve_token(state.users.as_ref(), key).await?;
        Ok(AuthUser(user))
    }
}
