use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::{delete, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{instrument, warn};

use super::{
    services::{remove_asset, replace_asset, AssetError, UploadItem},
    AssetKind,
};
use crate::{
    auth::extractors::AuthUser,
    error::ApiError,
    profile::dto::{PhotoUploaded, ResumeUploaded},
    state::AppState,
};

pub fn asset_routes(max_upload_bytes: usize) -> Router<AppState> {
    let uploads = Router::new()
        .route("/user/profile/upload-photo", post(upload_photo))
        .route("/user/profile/upload-resume", post(upload_resume))
        .layer(DefaultBodyLimit::max(max_upload_bytes));
    Router::new()
        .merge(uploads)
        .route("/user/profile/resume", delete(delete_resume))
}

fn multipart_rejection(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        warn!(error = %e, "upload exceeds body limit");
        return ApiError::PayloadTooLarge;
    }
    warn!(error = %e, "malformed multipart body");
    ApiError::validation("Malformed multipart body")
}

/// Pulls the file carried by `field` out of the form. Empty parts count as
/// missing.
async fn read_upload(mp: &mut Multipart, field: &str) -> Result<Option<UploadItem>, ApiError> {
    while let Some(part) = mp.next_field().await.map_err(multipart_rejection)? {
        if part.name() != Some(field) {
            continue;
        }
        let original_name = part.file_name().map(str::to_string);
        let content_type = part.content_type().map(str::to_string);
        let body = part.bytes().await.map_err(multipart_rejection)?;
        if body.is_empty() {
            return Ok(None);
        }
        return Ok(Some(UploadItem {
            original_name,
            content_type,
            body,
        }));
    }
    Ok(None)
}

async fn upload(
    state: &AppState,
    user_id: uuid::Uuid,
    kind: AssetKind,
    mut mp: Multipart,
    failure: &'static str,
) -> Result<String, ApiError> {
    let item = read_upload(&mut mp, kind.field_name())
        .await?
        .ok_or_else(|| ApiError::validation("No file uploaded"))?;
    replace_asset(state, user_id, kind, item)
        .await
        .map_err(|e| match e {
            AssetError::UserNotFound => ApiError::NotFound("User not found"),
            AssetError::Other(e) => ApiError::internal(failure)(e),
        })
}

#[instrument(skip(state, mp))]
pub async fn upload_photo(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mp: Multipart,
) -> Result<Json<PhotoUploaded>, ApiError> {
    let path = upload(
        &state,
        user_id,
        AssetKind::Photo,
        mp,
        "Server error during photo upload",
    )
    .await?;
    Ok(Json(PhotoUploaded {
        profile_image: path,
    }))
}

#[instrument(skip(state, mp))]
pub async fn upload_resume(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mp: Multipart,
) -> Result<Json<ResumeUploaded>, ApiError> {
    let path = upload(
        &state,
        user_id,
        AssetKind::Resume,
        mp,
        "Server error during resume upload",
    )
    .await?;
    Ok(Json(ResumeUploaded { resume: path }))
}

#[instrument(skip(state))]
pub async fn delete_resume(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>, ApiError> {
    remove_asset(&state, user_id, AssetKind::Resume)
        .await
        .map_err(|e| match e {
            AssetError::UserNotFound => ApiError::NotFound("User not found"),
            AssetError::Other(e) => ApiError::internal("Server error while removing resume")(e),
        })?;
    Ok(Json(json!({ "message": "Resume removed" })))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use uuid::Uuid;

    use crate::assets::AssetKind;
    use crate::profile::dto::ProfilePatch;
    use crate::test_support::{multipart_body, TestApp};
    use crate::users::{InsertError, NewUser, User, UserRepository};

    /// Delegates everything except asset updates, which always fail.
    struct AssetWritesFail(Arc<dyn UserRepository>);

    #[async_trait]
    impl UserRepository for AssetWritesFail {
        async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
            self.0.find_by_id(id).await
        }

        async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
            self.0.find_by_email(email).await
        }

        async fn find_by_google_id(&self, subject: &str) -> anyhow::Result<Option<User>> {
            self.0.find_by_google_id(subject).await
        }

        async fn insert(&self, new: NewUser) -> Result<User, InsertError> {
            self.0.insert(new).await
        }

        async fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> anyhow::Result<Option<User>> {
            self.0.update_profile(id, patch).await
        }

        async fn set_asset(
            &self,
            _id: Uuid,
            _kind: AssetKind,
            _path: Option<&str>,
        ) -> anyhow::Result<Option<User>> {
            anyhow::bail!("database unavailable")
        }
    }

    #[tokio::test]
    async fn failed_path_update_is_internal_and_discards_the_file() {
        let app = TestApp::with_user_store(|users| {
            Arc::new(AssetWritesFail(users)) as Arc<dyn UserRepository>
        })
        .await;
        let cookie = app.signed_in("eli@example.com").await;

        let (status, body) = app
            .upload("/api/user/profile/upload-photo", &cookie, "profilePhoto", "me.png", b"png")
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "internal");
        assert_eq!(body["message"], "Server error during photo upload");
        assert_eq!(app.stored_file_count("photos"), 0);
    }

    #[tokio::test]
    async fn oversized_upload_is_payload_too_large() {
        let app = TestApp::new().await;
        let cookie = app.signed_in("fin@example.com").await;
        let limit = app.state.config.max_upload_bytes;

        let (status, body) = app
            .upload(
                "/api/user/profile/upload-photo",
                &cookie,
                "profilePhoto",
                "big.png",
                &vec![7u8; limit * 2],
            )
            .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["code"], "payload_too_large");
        assert_eq!(app.stored_file_count("photos"), 0);
    }

    #[tokio::test]
    async fn photo_upload_replaces_previous_file() {
        let app = TestApp::new().await;
        let cookie = app.signed_in("ana@example.com").await;

        let (status, first) = app
            .upload("/api/user/profile/upload-photo", &cookie, "profilePhoto", "a.png", b"first")
            .await;
        assert_eq!(status, StatusCode::OK);
        let first = first["profileImage"].as_str().unwrap().to_string();
        assert!(first.starts_with("/uploads/photos/"));
        assert!(app.uploaded_file_exists(&first));

        let (status, second) = app
            .upload("/api/user/profile/upload-photo", &cookie, "profilePhoto", "b.png", b"second")
            .await;
        assert_eq!(status, StatusCode::OK);
        let second = second["profileImage"].as_str().unwrap().to_string();
        assert!(second.starts_with("/uploads/photos/"));
        assert_ne!(first, second);
        assert!(!app.uploaded_file_exists(&first));
        assert!(app.uploaded_file_exists(&second));

        let (_, profile) = app
            .request(Method::GET, "/api/user/profile", Some(&cookie), None)
            .await;
        assert_eq!(profile["profileImage"], json!(second));
    }

    #[tokio::test]
    async fn upload_without_file_is_bad_request() {
        let app = TestApp::new().await;
        let cookie = app.signed_in("bo@example.com").await;
        let (status, body) = app
            .upload("/api/user/profile/upload-resume", &cookie, "wrongField", "cv.pdf", b"%PDF")
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No file uploaded");

        let (status, _) = app
            .upload("/api/user/profile/upload-resume", &cookie, "resume", "cv.pdf", b"")
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_requires_session() {
        let app = TestApp::new().await;
        let (boundary, body) = multipart_body("profilePhoto", "a.png", b"x");
        let res = app
            .raw(
                Method::POST,
                "/api/user/profile/upload-photo",
                None,
                Some(format!("multipart/form-data; boundary={boundary}")),
                body,
            )
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn resume_upload_then_remove() {
        let app = TestApp::new().await;
        let cookie = app.signed_in("cy@example.com").await;
        let (status, body) = app
            .upload("/api/user/profile/upload-resume", &cookie, "resume", "CV.PDF", b"%PDF-1.4")
            .await;
        assert_eq!(status, StatusCode::OK);
        let path = body["resume"].as_str().unwrap().to_string();
        assert!(path.starts_with("/uploads/resumes/resume-") && path.ends_with(".pdf"));

        let (status, body) = app
            .request(Method::DELETE, "/api/user/profile/resume", Some(&cookie), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Resume removed");
        assert!(!app.uploaded_file_exists(&path));

        let (_, profile) = app
            .request(Method::GET, "/api/user/profile", Some(&cookie), None)
            .await;
        assert!(profile["resume"].is_null());
    }

    #[tokio::test]
    async fn removing_absent_resume_is_a_no_op() {
        let app = TestApp::new().await;
        let cookie = app.signed_in("di@example.com").await;
        for _ in 0..2 {
            let (status, body) = app
                .request(Method::DELETE, "/api/user/profile/resume", Some(&cookie), None)
                .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["message"], "Resume removed");
        }
        let (_, profile) = app
            .request(Method::GET, "/api/user/profile", Some(&cookie), None)
            .await;
        assert!(profile["resume"].is_null());
    }
}
