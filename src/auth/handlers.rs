use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header::SET_COOKIE, StatusCode},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use time::Duration;
use tracing::{info, instrument, warn};

use super::{
    dto::{CallbackQuery, LoginRequest, LoginResponse, MeResponse, MessageResponse, RegisterRequest},
    extractors::{MaybeUser, SessionToken},
    google::{sign_state, verify_state, STATE_TTL_MINUTES},
    services::{self, is_valid_email, RegisterError, VerifyError},
    session::{clear_session_cookie, cookie, generate_token, read_cookie, session_cookie, Session},
};
use crate::{error::ApiError, profile::dto::UserView, state::AppState, users::Role};

const OAUTH_NONCE_COOKIE: &str = "oauth_nonce";
const OAUTH_COOKIE_PATH: &str = "/api/auth";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
        .route("/auth/logout", post(logout))
        .route("/auth/google", get(google_start))
        .route("/auth/google/callback", get(google_callback))
}

fn bad_json(rejection: JsonRejection) -> ApiError {
    ApiError::validation(rejection.body_text())
}

async fn open_session(state: &AppState, user_id: uuid::Uuid) -> anyhow::Result<Session> {
    let ttl = Duration::minutes(state.config.session.ttl_minutes);
    state.sessions.create(user_id, ttl).await
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let Json(payload) = payload.map_err(bad_json)?;
    let name = payload.name.trim().to_string();
    let email = payload.email.trim().to_string();

    if name.is_empty() || email.is_empty() || payload.password.is_empty() {
        warn!("registration with missing fields");
        return Err(ApiError::validation("Name, email and password are required"));
    }
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(ApiError::validation("Invalid email"));
    }
    if payload.password.len() < 8 {
        warn!("password too short");
        return Err(ApiError::validation("Password must be at least 8 characters"));
    }
    let role = payload.role.unwrap_or_default();
    if role == Role::Admin {
        warn!(email = %email, "attempt to self-register as admin");
        return Err(ApiError::validation("Role must be jobSeeker or employer"));
    }

    match services::register(state.users.as_ref(), name, email, payload.password, role).await {
        Ok(_) => Ok((
            StatusCode::CREATED,
            Json(MessageResponse {
                message: "Registration successful. Please log in.",
            }),
        )),
        Err(RegisterError::AlreadyExists) => {
            warn!("email already registered");
            Err(ApiError::DuplicateEmail)
        }
        Err(RegisterError::Other(e)) => Err(ApiError::internal("Server error during registration")(e)),
    }
}

#[instrument(skip(state, payload, previous))]
pub async fn login(
    State(state): State<AppState>,
    SessionToken(previous): SessionToken,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload.map_err(bad_json)?;
    let email = payload.email.trim();
    if email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::validation("Email and password are required"));
    }

    let user = match services::verify(state.users.as_ref(), email, payload.password).await {
        Ok(user) => user,
        Err(VerifyError::NotFound) => {
            warn!(email = %email, "login unknown email");
            return Err(ApiError::NotFound("User not found"));
        }
        Err(VerifyError::FederatedOnly) => {
            warn!(email = %email, "password login for federated account");
            return Err(ApiError::FederatedAccount);
        }
        Err(VerifyError::BadCredential) => {
            warn!(email = %email, "login invalid password");
            return Err(ApiError::BadCredentials);
        }
        Err(VerifyError::Other(e)) => return Err(ApiError::internal("Internal server error")(e)),
    };

    // A fresh token on every login; any token the client already held is dropped.
    if let Some(previous) = previous {
        if let Err(e) = state.sessions.destroy(&previous).await {
            warn!(error = %e, "failed to drop previous session");
        }
    }
    let session = open_session(&state, user.id)
        .await
        .map_err(ApiError::internal("Internal server error"))?;
    let set_cookie = session_cookie(&state.config.session, &session)
        .map_err(ApiError::internal("Internal server error"))?;

    info!(user_id = %user.id, "user logged in");
    Ok((
        AppendHeaders([(SET_COOKIE, set_cookie)]),
        Json(LoginResponse {
            message: "Login successful",
            user: UserView::from(user),
        }),
    )
        .into_response())
}

#[instrument(skip(state, current))]
pub async fn me(
    State(state): State<AppState>,
    current: MaybeUser,
) -> Result<Json<MeResponse>, ApiError> {
    let MaybeUser(Some(user_id)) = current else {
        return Ok(Json(MeResponse { user: None }));
    };
    let user = state
        .users
        .find_by_id(user_id)
        .await
        .map_err(ApiError::internal("Server error while fetching user"))?;
    Ok(Json(MeResponse {
        user: user.map(UserView::from),
    }))
}

#[instrument(skip(state, token))]
pub async fn logout(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> Result<Response, ApiError> {
    if let Some(token) = token {
        state
            .sessions
            .destroy(&token)
            .await
            .map_err(ApiError::internal("Logout failed"))?;
        info!("session destroyed");
    }
    let cleared = clear_session_cookie(&state.config.session)
        .map_err(ApiError::internal("Logout failed"))?;
    Ok((
        AppendHeaders([(SET_COOKIE, cleared)]),
        Json(MessageResponse {
            message: "Logged out successfully",
        }),
    )
        .into_response())
}

#[instrument(skip(state))]
pub async fn google_start(State(state): State<AppState>) -> Result<Response, ApiError> {
    let provider = state
        .google
        .as_ref()
        .ok_or(ApiError::NotFound("Google login is not configured"))?;
    let nonce = generate_token();
    let url = sign_state(&state.config.session.secret, &nonce)
        .and_then(|st| provider.authorize_url(&st))
        .map_err(ApiError::internal("Could not start Google login"))?;
    let nonce_cookie = cookie(
        &state.config.session,
        OAUTH_NONCE_COOKIE,
        &nonce,
        STATE_TTL_MINUTES * 60,
        OAUTH_COOKIE_PATH,
    )
    .map_err(ApiError::internal("Could not start Google login"))?;
    Ok((AppendHeaders([(SET_COOKIE, nonce_cookie)]), Redirect::to(&url)).into_response())
}

/// Completes the provider round-trip with a redirect to the frontend: the root
/// on success, the login page on failure.
#[instrument(skip(state, query, headers))]
pub async fn google_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    headers: axum::http::HeaderMap,
) -> Response {
    let cfg = &state.config.session;
    let clear_nonce = match cookie(cfg, OAUTH_NONCE_COOKIE, "", 0, OAUTH_COOKIE_PATH) {
        Ok(c) => c,
        Err(e) => return ApiError::internal("Could not complete Google login")(e).into_response(),
    };
    let nonce = read_cookie(&headers, OAUTH_NONCE_COOKIE);

    let outcome = finish_google_login(&state, query, nonce)
        .await
        .and_then(|session| session_cookie(cfg, &session).map(|set| (session, set)));
    match outcome {
        Ok((session, set_session)) => {
            info!(user_id = %session.user_id, "federated login succeeded");
            (
                AppendHeaders([
                    (SET_COOKIE, set_session),
                    (SET_COOKIE, clear_nonce),
                ]),
                Redirect::to(&format!("{}/", state.config.frontend_url)),
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, "federated login failed");
            (
                AppendHeaders([(SET_COOKIE, clear_nonce)]),
                Redirect::to(&format!("{}/login", state.config.frontend_url)),
            )
                .into_response()
        }
    }
}

async fn finish_google_login(
    state: &AppState,
    query: CallbackQuery,
    nonce: Option<String>,
) -> anyhow::Result<Session> {
    let provider = state
        .google
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("google login is not configured"))?;
    if let Some(err) = query.error {
        anyhow::bail!("provider returned error {err:?}");
    }
    let (Some(code), Some(st), Some(nonce)) = (query.code, query.state, nonce) else {
        anyhow::bail!("callback is missing code, state or nonce cookie");
    };
    verify_state(&state.config.session.secret, &st, &nonce)?;

    let identity = provider.exchange(&code).await?;
    let user = services::resolve_federated(state.users.as_ref(), identity).await?;
    open_session(state, user.id).await
}
