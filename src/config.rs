use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Signs the OAuth `state` parameter.
    pub secret: String,
    pub cookie_name: String,
    pub ttl_minutes: i64,
    pub secure_cookie: bool,
    pub backend: SessionBackend,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub callback_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub frontend_url: String,
    pub uploads_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub session: SessionConfig,
    pub google: Option<GoogleConfig>,
}

/// Cookie names are RFC 6265 tokens: visible ASCII without separators.
pub fn is_valid_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b))
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let frontend_url = std::env::var("FRONTEND_URL")
            .unwrap_or_else(|_| "http://localhost:3000".into())
            .trim_end_matches('/')
            .to_string();
        let uploads_dir = std::env::var("UPLOADS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("uploads"));
        let max_upload_mb = std::env::var("MAX_UPLOAD_MB")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(10);

        let secret = std::env::var("SESSION_SECRET")
            .or_else(|_| std::env::var("JWT_SECRET"))
            .context("SESSION_SECRET (or JWT_SECRET) is not set")?;
        let backend = match std::env::var("SESSION_BACKEND").as_deref() {
            Ok("memory") => SessionBackend::Memory,
            Ok("postgres") | Err(_) => SessionBackend::Postgres,
            Ok(other) => anyhow::bail!("unknown SESSION_BACKEND {other:?}"),
        };
        let cookie_name =
            std::env::var("SESSION_COOKIE_NAME").unwrap_or_else(|_| "jobboard.sid".into());
        anyhow::ensure!(
            is_valid_cookie_name(&cookie_name),
            "SESSION_COOKIE_NAME {cookie_name:?} is not a valid cookie name"
        );
        let session = SessionConfig {
            secret,
            cookie_name,
            ttl_minutes: std::env::var("SESSION_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24 * 7),
            secure_cookie: std::env::var("SESSION_COOKIE_SECURE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            backend,
        };

        let google = match (
            std::env::var("GOOGLE_CLIENT_ID"),
            std::env::var("GOOGLE_CLIENT_SECRET"),
        ) {
            (Ok(client_id), Ok(client_secret)) => Some(GoogleConfig {
                client_id,
                client_secret,
                callback_url: std::env::var("GOOGLE_CALLBACK_URL").unwrap_or_else(|_| {
                    "http://localhost:8080/api/auth/google/callback".into()
                }),
            }),
            _ => None,
        };

        Ok(Self {
            database_url,
            frontend_url,
            uploads_dir,
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            session,
            google,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_names_must_be_tokens() {
        assert!(is_valid_cookie_name("jobboard.sid"));
        assert!(is_valid_cookie_name("sid_2-x"));
        for bad in ["", "my sid", "sid;x", "a=b", "s\u{e9}ance", "tab\t"] {
            assert!(!is_valid_cookie_name(bad), "{bad:?}");
        }
    }
}
