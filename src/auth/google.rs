use anyhow::Context;
use async_trait::async_trait;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::config::GoogleConfig;

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// How long a started login may take before its `state` stops being accepted.
pub const STATE_TTL_MINUTES: i64 = 10;

/// Identity asserted by an external provider after it has authenticated the user.
#[derive(Debug, Clone)]
pub struct FederatedIdentity {
    pub subject: String,
    pub email: String,
    pub email_verified: bool,
    pub name: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// URL the browser is sent to in order to authenticate.
    fn authorize_url(&self, state: &str) -> anyhow::Result<String>;
    /// Trades the callback's authorization code for the user's identity.
    async fn exchange(&self, code: &str) -> anyhow::Result<FederatedIdentity>;
}

pub struct GoogleProvider {
    config: GoogleConfig,
    http: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(config: GoogleConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct UserInfo {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    name: Option<String>,
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn authorize_url(&self, state: &str) -> anyhow::Result<String> {
        let url = Url::parse_with_params(
            AUTHORIZE_URL,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.callback_url.as_str()),
                ("response_type", "code"),
                ("scope", "openid email profile"),
                ("state", state),
            ],
        )?;
        Ok(url.into())
    }

    async fn exchange(&self, code: &str) -> anyhow::Result<FederatedIdentity> {
        let token: TokenResponse = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.callback_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .context("google token request")?
            .error_for_status()
            .context("google token response")?
            .json()
            .await
            .context("decode google token response")?;

        let info: UserInfo = self
            .http
            .get(USERINFO_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .context("google userinfo request")?
            .error_for_status()
            .context("google userinfo response")?
            .json()
            .await
            .context("decode google userinfo")?;
        debug!(subject = %info.sub, "google identity received");

        Ok(FederatedIdentity {
            subject: info.sub,
            email: info.email.context("google account has no email")?,
            email_verified: info.email_verified,
            name: info.name,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StateClaims {
    nonce: String,
    iat: i64,
    exp: i64,
}

/// Signs the OAuth `state` parameter, binding it to a nonce that is also
/// handed to the browser as a cookie.
pub fn sign_state(secret: &str, nonce: &str) -> anyhow::Result<String> {
    let now = OffsetDateTime::now_utc();
    let claims = StateClaims {
        nonce: nonce.to_string(),
        iat: now.unix_timestamp(),
        exp: (now + Duration::minutes(STATE_TTL_MINUTES)).unix_timestamp(),
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

/// Accepts `state` only if it is unexpired, was signed with `secret`, and
/// carries the nonce from the browser's cookie.
pub fn verify_state(secret: &str, state: &str, nonce_cookie: &str) -> anyhow::Result<()> {
    let data = decode::<StateClaims>(
        state,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )?;
    anyhow::ensure!(data.claims.nonce == nonce_cookie, "oauth state nonce mismatch");
    Ok(())
}
