use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;

use crate::assets::AssetKind;
use crate::auth::google::{GoogleProvider, IdentityProvider};
use crate::auth::session::{MemorySessionStore, PgSessionStore, SessionStore};
use crate::config::{AppConfig, SessionBackend};
use crate::storage::{LocalStorage, StorageClient};
use crate::users::{PgUserRepository, UserRepository};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserRepository>,
    pub sessions: Arc<dyn SessionStore>,
    pub storage: Arc<dyn StorageClient>,
    pub google: Option<Arc<dyn IdentityProvider>>,
}

impl AppState {
    /// Builds production state; also returns the pool so the caller can run migrations.
    pub async fn init() -> anyhow::Result<(Self, PgPool)> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        let sessions: Arc<dyn SessionStore> = match config.session.backend {
            SessionBackend::Postgres => Arc::new(PgSessionStore::new(db.clone())),
            SessionBackend::Memory => Arc::new(MemorySessionStore::default()),
        };

        let areas = AssetKind::ALL.map(AssetKind::area);
        let storage =
            Arc::new(LocalStorage::new(&config.uploads_dir, &areas).await?) as Arc<dyn StorageClient>;

        let google = config
            .google
            .clone()
            .map(|g| Arc::new(GoogleProvider::new(g)) as Arc<dyn IdentityProvider>);
        if google.is_none() {
            tracing::warn!("GOOGLE_CLIENT_ID/GOOGLE_CLIENT_SECRET not set; Google login disabled");
        }

        let state = Self {
            users: Arc::new(PgUserRepository::new(db.clone())),
            config,
            sessions,
            storage,
            google,
        };
        Ok((state, db))
    }
}

#[cfg(test)]
impl AppState {
    /// In-memory state rooted at `uploads`. The user repository is returned
    /// separately so tests can inspect it.
    pub async fn fake(
        uploads: &std::path::Path,
    ) -> (Self, Arc<crate::users::repo::MemoryUserRepository>) {
        Self::fake_with_google(uploads, None).await
    }

    pub async fn fake_with_google(
        uploads: &std::path::Path,
        google: Option<Arc<dyn IdentityProvider>>,
    ) -> (Self, Arc<crate::users::repo::MemoryUserRepository>) {
        use crate::config::SessionConfig;

        let config = Arc::new(AppConfig {
            database_url: "postgres://unused".into(),
            frontend_url: "http://frontend.test".into(),
            uploads_dir: uploads.to_path_buf(),
            max_upload_bytes: 1024 * 1024,
            session: SessionConfig {
                secret: "test-secret".into(),
                cookie_name: "jobboard.sid".into(),
                ttl_minutes: 60,
                secure_cookie: false,
                backend: SessionBackend::Memory,
            },
            google: None,
        });
        let areas = AssetKind::ALL.map(AssetKind::area);
        let storage = LocalStorage::new(uploads, &areas)
            .await
            .expect("create upload areas");
        let users = Arc::new(crate::users::repo::MemoryUserRepository::default());
        let state = Self {
            config,
            users: users.clone(),
            sessions: Arc::new(MemorySessionStore::default()),
            storage: Arc::new(storage),
            google,
        };
        (state, users)
    }
}
