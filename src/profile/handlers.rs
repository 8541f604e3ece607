use axum::{
    extract::{rejection::JsonRejection, State},
    routing::get,
    Json, Router,
};
use serde_json::Value;
use tracing::{info, instrument, warn};

use super::dto::{PatchError, ProfilePatch, UserView};
use crate::{auth::extractors::AuthUser, error::ApiError, state::AppState};

pub fn profile_routes() -> Router<AppState> {
    Router::new().route("/user/profile", get(get_profile).put(update_profile))
}

#[instrument(skip(state))]
pub async fn get_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<UserView>, ApiError> {
    let user = state
        .users
        .find_by_id(user_id)
        .await
        .map_err(ApiError::internal("Server error while fetching profile"))?
        .ok_or(ApiError::NotFound("User not found"))?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, body))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<UserView>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::validation(e.body_text()))?;
    let patch = ProfilePatch::from_json(body).map_err(|e| {
        warn!(%user_id, error = %e, "profile patch rejected");
        match e {
            PatchError::Protected(field) => ApiError::ForbiddenField(field),
            other => ApiError::validation(other.to_string()),
        }
    })?;

    let user = if patch.is_empty() {
        state.users.find_by_id(user_id).await
    } else {
        state.users.update_profile(user_id, &patch).await
    }
    .map_err(ApiError::internal("Server error while updating profile"))?
    .ok_or(ApiError::NotFound("User not found"))?;

    info!(%user_id, "profile updated");
    Ok(Json(user.into()))
}
