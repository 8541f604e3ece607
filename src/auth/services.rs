use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info};

use super::{
    google::FederatedIdentity,
    password::{hash_password_blocking, verify_password_blocking},
};
use crate::users::{Credential, InsertError, NewUser, Role, User, UserRepository};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("email already registered")]
    AlreadyExists,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("no account with this email")]
    NotFound,
    #[error("account uses federated login only")]
    FederatedOnly,
    #[error("password does not match")]
    BadCredential,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Creates a local account. Does not sign the user in.
pub async fn register(
    users: &dyn UserRepository,
    name: String,
    email: String,
    raw_password: String,
    role: Role,
) -> Result<User, RegisterError> {
    if users.find_by_email(&email).await?.is_some() {
        return Err(RegisterError::AlreadyExists);
    }
    let hash = hash_password_blocking(raw_password).await?;
    let new = NewUser {
        name,
        email,
        credential: Credential::Password { hash },
        role,
        is_verified: false,
    };
    // The pre-check above can race; the store's unique email constraint decides.
    match users.insert(new).await {
        Ok(user) => {
            info!(user_id = %user.id, email = %user.email, "user registered");
            Ok(user)
        }
        Err(InsertError::EmailTaken) => Err(RegisterError::AlreadyExists),
        Err(InsertError::Other(e)) => Err(e.into()),
    }
}

/// Checks a password login. Federated accounts are refused before any hash
/// comparison happens.
pub async fn verify(
    users: &dyn UserRepository,
    email: &str,
    raw_password: String,
) -> Result<User, VerifyError> {
    let user = users
        .find_by_email(email)
        .await?
        .ok_or(VerifyError::NotFound)?;
    let hash = match &user.credential {
        Credential::Password { hash } => hash.clone(),
        Credential::Google { .. } => return Err(VerifyError::FederatedOnly),
    };
    if !verify_password_blocking(raw_password, hash).await? {
        return Err(VerifyError::BadCredential);
    }
    debug!(user_id = %user.id, "password verified");
    Ok(user)
}

/// Finds the account behind a provider assertion, creating one on first
/// login. An existing account with the same email is reused only when the
/// provider vouches for that email.
pub async fn resolve_federated(
    users: &dyn UserRepository,
    identity: FederatedIdentity,
) -> anyhow::Result<User> {
    if let Some(user) = users.find_by_google_id(&identity.subject).await? {
        return Ok(user);
    }
    if let Some(user) = users.find_by_email(&identity.email).await? {
        anyhow::ensure!(
            identity.email_verified,
            "provider email {} is unverified and already registered",
            identity.email
        );
        info!(user_id = %user.id, "federated login matched existing account by email");
        return Ok(user);
    }

    let name = identity
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| identity.email.split('@').next().unwrap_or_default().to_string());
    let new = NewUser {
        name,
        email: identity.email,
        credential: Credential::Google {
            subject: identity.subject,
        },
        role: Role::JobSeeker,
        is_verified: identity.email_verified,
    };
    let user = users.insert(new).await.map_err(anyhow::Error::from)?;
    info!(user_id = %user.id, "federated user created");
    Ok(user)
}
