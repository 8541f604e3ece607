use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::warn;
use uuid::Uuid;

use super::session::read_cookie;
use crate::{error::ApiError, state::AppState};

/// Session token presented by the client, if any. Not validated.
pub struct SessionToken(pub Option<String>);

#[async_trait]
impl FromRequestParts<AppState> for SessionToken {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(SessionToken(read_cookie(
            &parts.headers,
            &state.config.session.cookie_name,
        )))
    }
}

/// Resolves the session cookie to a user id when one is bound. Never rejects
/// an anonymous request.
pub struct MaybeUser(pub Option<Uuid>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let SessionToken(token) = SessionToken::from_request_parts(parts, state).await?;
        let Some(token) = token else {
            return Ok(MaybeUser(None));
        };
        let user_id = state
            .sessions
            .resolve(&token)
            .await
            .map_err(ApiError::internal("Server error while checking session"))?;
        Ok(MaybeUser(user_id))
    }
}

/// Authenticated user id. Rejects with 401 when no valid session is bound.
pub struct AuthUser(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match MaybeUser::from_request_parts(parts, state).await? {
            MaybeUser(Some(user_id)) => Ok(AuthUser(user_id)),
            MaybeUser(None) => {
                warn!(path = %parts.uri.path(), "request without valid session");
                Err(ApiError::Unauthenticated)
            }
        }
    }
}
