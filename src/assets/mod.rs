use axum::Router;

use crate::state::AppState;

pub mod handlers;
pub mod services;

/// Public URL prefix under which stored assets are served.
pub const UPLOADS_PREFIX: &str = "/uploads/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Photo,
    Resume,
}

impl AssetKind {
    pub const ALL: [AssetKind; 2] = [AssetKind::Photo, AssetKind::Resume];

    /// Directory below the uploads root.
    pub fn area(self) -> &'static str {
        match self {
            AssetKind::Photo => "photos",
            AssetKind::Resume => "resumes",
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            AssetKind::Photo => "photo",
            AssetKind::Resume => "resume",
        }
    }

    /// Multipart field carrying the upload.
    pub fn field_name(self) -> &'static str {
        match self {
            AssetKind::Photo => "profilePhoto",
            AssetKind::Resume => "resume",
        }
    }

    pub fn current(self, user: &crate::users::User) -> Option<&str> {
        match self {
            AssetKind::Photo => user.profile_image.as_deref(),
            AssetKind::Resume => user.resume.as_deref(),
        }
    }
}

pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    handlers::asset_routes(max_upload_bytes)
}
