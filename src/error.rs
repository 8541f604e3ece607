use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

/// Error returned by every handler. Each variant maps to a fixed status and
/// `code`, so clients can branch on the pair.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("User already exists")]
    DuplicateEmail,
    #[error("User registered with Google. Please use Google login.")]
    FederatedAccount,
    #[error("Field '{0}' cannot be changed through the profile endpoint")]
    ForbiddenField(String),
    #[error("Uploaded file is too large")]
    PayloadTooLarge,
    #[error("Not authenticated")]
    Unauthenticated,
    #[error("Incorrect password")]
    BadCredentials,
    #[error("{0}")]
    NotFound(&'static str),
    /// `message` is what the caller sees; `source` only reaches the logs.
    #[error("{message}")]
    Internal {
        message: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: &'static str,
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(message: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Internal { message, source }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::DuplicateEmail
            | Self::FederatedAccount
            | Self::ForbiddenField(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated | Self::BadCredentials => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::DuplicateEmail => "duplicate_email",
            Self::FederatedAccount => "federated_account",
            Self::ForbiddenField(_) => "forbidden_field",
            Self::Unauthenticated => "unauthenticated",
            Self::BadCredentials => "bad_credentials",
            Self::NotFound(_) => "not_found",
            Self::PayloadTooLarge => "payload_too_large",
            Self::Internal { .. } => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal { message, source } = &self {
            error!(error = ?source, "{message}");
        }
        let body = ErrorBody {
            message: self.to_string(),
            code: self.code(),
        };
        (self.status(), Json(body)).into_response()
    }
}
