use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::SessionConfig;

const TOKEN_LEN: usize = 48;

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: OffsetDateTime,
}

/// Server-side map from opaque session tokens to user ids.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, user_id: Uuid, ttl: Duration) -> anyhow::Result<Session>;
    /// `None` for unknown or expired tokens.
    async fn resolve(&self, token: &str) -> anyhow::Result<Option<Uuid>>;
    /// Removing an unknown token is not an error.
    async fn destroy(&self, token: &str) -> anyhow::Result<()>;
    /// Drops expired entries; returns how many were removed.
    async fn purge_expired(&self) -> anyhow::Result<u64>;
}

pub fn generate_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

pub struct PgSessionStore {
    db: PgPool,
}

impl PgSessionStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, user_id: Uuid, ttl: Duration) -> anyhow::Result<Session> {
        let session = Session {
            token: generate_token(),
            user_id,
            expires_at: OffsetDateTime::now_utc() + ttl,
        };
        sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(&session.token)
            .bind(session.user_id)
            .bind(session.expires_at)
            .execute(&self.db)
            .await
            .context("insert session")?;
        Ok(session)
    }

    async fn resolve(&self, token: &str) -> anyhow::Result<Option<Uuid>> {
        let row = sqlx::query_as::<_, (Uuid,)>(
            "SELECT user_id FROM sessions WHERE token = $1 AND expires_at > now()",
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await
        .context("resolve session")?;
        Ok(row.map(|(id,)| id))
    }

    async fn destroy(&self, token: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.db)
            .await
            .context("delete session")?;
        Ok(())
    }

    async fn purge_expired(&self) -> anyhow::Result<u64> {
        let res = sqlx::query("DELETE FROM sessions WHERE expires_at <= now()")
            .execute(&self.db)
            .await
            .context("purge sessions")?;
        Ok(res.rows_affected())
    }
}

/// Process-local sessions; lost on restart.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, (Uuid, OffsetDateTime)>>,
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, user_id: Uuid, ttl: Duration) -> anyhow::Result<Session> {
        let session = Session {
            token: generate_token(),
            user_id,
            expires_at: OffsetDateTime::now_utc() + ttl,
        };
        self.sessions
            .write()
            .await
            .insert(session.token.clone(), (user_id, session.expires_at));
        Ok(session)
    }

    async fn resolve(&self, token: &str) -> anyhow::Result<Option<Uuid>> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .sessions
            .read()
            .await
            .get(token)
            .filter(|(_, exp)| *exp > now)
            .map(|(id, _)| *id))
    }

    async fn destroy(&self, token: &str) -> anyhow::Result<()> {
        self.sessions.write().await.remove(token);
        Ok(())
    }

    async fn purge_expired(&self) -> anyhow::Result<u64> {
        let now = OffsetDateTime::now_utc();
        let mut map = self.sessions.write().await;
        let before = map.len();
        map.retain(|_, (_, exp)| *exp > now);
        Ok((before - map.len()) as u64)
    }
}

/// Reads cookie `name` from every `Cookie` header on the request.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
        .filter(|v| !v.is_empty())
}

pub fn cookie(
    cfg: &SessionConfig,
    name: &str,
    value: &str,
    max_age_secs: i64,
    path: &str,
) -> anyhow::Result<HeaderValue> {
    let secure = if cfg.secure_cookie { "; Secure" } else { "" };
    let raw = format!("{name}={value}; Path={path}; Max-Age={max_age_secs}; HttpOnly; SameSite=Lax{secure}");
    HeaderValue::from_str(&raw).with_context(|| format!("build Set-Cookie for {name:?}"))
}

pub fn session_cookie(cfg: &SessionConfig, session: &Session) -> anyhow::Result<HeaderValue> {
    cookie(cfg, &cfg.cookie_name, &session.token, cfg.ttl_minutes * 60, "/")
}

pub fn clear_session_cookie(cfg: &SessionConfig) -> anyhow::Result<HeaderValue> {
    cookie(cfg, &cfg.cookie_name, "", 0, "/")
}
