use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::warn;

use super::{
    cookies::{bearer_token, read_cookie, ACCESS_COOKIE},
    repo_types::User,
};
use crate::{error::AppError, state::AppState};

/// Caller authenticated by an access token from the `accessToken` cookie or
/// `Authorization: Bearer`, loaded from the store.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = read_cookie(&parts.headers, ACCESS_COOKIE)
            .or_else(|| bearer_token(&parts.headers))
            .ok_or_else(|| AppError::Unauthorized("Unauthorized request".into()))?;

        let claims = state.tokens.verify_access(&token)?;

        let user = state.users.find_by_id(claims.sub).await?.ok_or_else(|| {
            warn!(user_id = %claims.sub, "access token for unknown user");
            AppError::Unauthorized("Invalid access token".into())
        })?;

        Ok(AuthUser(user))
    }
}
