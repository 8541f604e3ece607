//! Harness for driving the full router in unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, Response, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use crate::app::build_app;
use crate::assets::UPLOADS_PREFIX;
use crate::auth::google::{FederatedIdentity, IdentityProvider};
use crate::state::AppState;
use crate::users::repo::MemoryUserRepository;
use crate::users::{Credential, NewUser, Role, User, UserRepository};

pub const TEST_PASSWORD: &str = "correct-horse";

pub struct TestApp {
    pub router: Router,
    pub users: Arc<MemoryUserRepository>,
    pub state: AppState,
    dir: TempDir,
}

/// Accepts the code "good" and nothing else.
struct FakeGoogle;

#[async_trait]
impl IdentityProvider for FakeGoogle {
    fn authorize_url(&self, state: &str) -> anyhow::Result<String> {
        Ok(format!("https://accounts.example/auth?state={state}"))
    }

    async fn exchange(&self, code: &str) -> anyhow::Result<FederatedIdentity> {
        if code != "good" {
            anyhow::bail!("unknown code");
        }
        Ok(FederatedIdentity {
            subject: "google-sub-1".into(),
            email: "google-user@example.com".into(),
            email_verified: true,
            name: Some("Google User".into()),
        })
    }
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(None, |users| users).await
    }

    pub async fn with_google() -> Self {
        Self::build(Some(Arc::new(FakeGoogle)), |users| users).await
    }

    /// Routes user-store calls through `wrap`, which receives the in-memory
    /// repository the app would otherwise use directly.
    pub async fn with_user_store(
        wrap: impl FnOnce(Arc<dyn UserRepository>) -> Arc<dyn UserRepository>,
    ) -> Self {
        Self::build(None, wrap).await
    }

    async fn build(
        google: Option<Arc<dyn IdentityProvider>>,
        wrap: impl FnOnce(Arc<dyn UserRepository>) -> Arc<dyn UserRepository>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, users) = AppState::fake_with_google(dir.path(), google).await;
        state.users = wrap(state.users);
        let router = build_app(state.clone()).unwrap();
        Self {
            router,
            users,
            state,
            dir,
        }
    }

    pub async fn raw(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        content_type: Option<String>,
        body: Vec<u8>,
    ) -> Response<Body> {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            req = req.header(header::COOKIE, cookie);
        }
        if let Some(ct) = content_type {
            req = req.header(header::CONTENT_TYPE, ct);
        }
        let req = req.body(Body::from(body)).unwrap();
        self.router.clone().oneshot(req).await.unwrap()
    }

    pub async fn raw_json(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        body: Value,
    ) -> Response<Body> {
        self.raw(
            method,
            uri,
            cookie,
            Some("application/json".into()),
            serde_json::to_vec(&body).unwrap(),
        )
        .await
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let res = match body {
            Some(body) => self.raw_json(method, uri, cookie, body).await,
            None => self.raw(method, uri, cookie, None, Vec::new()).await,
        };
        read_json(res).await
    }

    pub async fn upload(
        &self,
        uri: &str,
        cookie: &str,
        field: &str,
        filename: &str,
        bytes: &[u8],
    ) -> (StatusCode, Value) {
        let (boundary, body) = multipart_body(field, filename, bytes);
        let res = self
            .raw(
                Method::POST,
                uri,
                Some(cookie),
                Some(format!("multipart/form-data; boundary={boundary}")),
                body,
            )
            .await;
        read_json(res).await
    }

    /// Registers a job seeker through the public endpoint.
    pub async fn register(&self, email: &str, password: &str) {
        let (status, body) = self
            .request(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({"name": "Test User", "email": email, "password": password})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
    }

    /// Registers and logs in, returning the `name=value` session cookie.
    pub async fn signed_in(&self, email: &str) -> String {
        self.register(email, TEST_PASSWORD).await;
        let res = self
            .raw_json(
                Method::POST,
                "/api/auth/login",
                None,
                json!({"email": email, "password": TEST_PASSWORD}),
            )
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        set_cookie_pair(&res, &self.state.config.session.cookie_name).expect("session cookie")
    }

    /// Opens a session directly in the store, whether or not the user exists.
    pub async fn session_for(&self, user_id: Uuid) -> String {
        let session = self
            .state
            .sessions
            .create(user_id, time::Duration::hours(1))
            .await
            .unwrap();
        format!("{}={}", self.state.config.session.cookie_name, session.token)
    }

    pub async fn federated_user(&self, email: &str) -> User {
        self.users
            .insert(NewUser {
                name: "Fed User".into(),
                email: email.into(),
                credential: Credential::Google {
                    subject: format!("sub-{email}"),
                },
                role: Role::JobSeeker,
                is_verified: true,
            })
            .await
            .map_err(|_| "insert failed")
            .unwrap()
    }

    /// Number of files stored in an upload area such as `photos`.
    pub fn stored_file_count(&self, area: &str) -> usize {
        std::fs::read_dir(self.dir.path().join(area))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub fn uploaded_file_exists(&self, public_path: &str) -> bool {
        public_path
            .strip_prefix(UPLOADS_PREFIX)
            .map(|rel| self.dir.path().join(rel).is_file())
            .unwrap_or(false)
    }
}

async fn read_json(res: Response<Body>) -> (StatusCode, Value) {
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

/// Single-part form body. Returns the boundary alongside the encoded bytes.
pub fn multipart_body(field: &str, filename: &str, bytes: &[u8]) -> (String, Vec<u8>) {
    let boundary = "X-JOBBOARD-TEST-BOUNDARY".to_string();
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (boundary, body)
}

/// `name=value` from the response's Set-Cookie headers, if it sets a
/// non-empty value for `name`.
pub fn set_cookie_pair(res: &Response<Body>, name: &str) -> Option<String> {
    res.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, v)| k.trim() == name && !v.is_empty())
        .map(|(k, v)| format!("{}={}", k.trim(), v))
}
