use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    #[default]
    JobSeeker,
    Employer,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::JobSeeker => "jobSeeker",
            Role::Employer => "employer",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jobSeeker" => Ok(Role::JobSeeker),
            "employer" => Ok(Role::Employer),
            "admin" => Ok(Role::Admin),
            other => anyhow::bail!("unknown role {other:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Local,
    Google,
}

impl AuthMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthMethod::Local => "local",
            AuthMethod::Google => "google",
        }
    }
}

/// Where an account's proof of identity comes from. A password hash exists
/// only for local accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Password { hash: String },
    Google { subject: String },
}

impl Credential {
    pub fn auth_method(&self) -> AuthMethod {
        match self {
            Credential::Password { .. } => AuthMethod::Local,
            Credential::Google { .. } => AuthMethod::Google,
        }
    }

    fn into_columns(self) -> (AuthMethod, Option<String>, Option<String>) {
        match self {
            Credential::Password { hash } => (AuthMethod::Local, Some(hash), None),
            Credential::Google { subject } => (AuthMethod::Google, None, Some(subject)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Experience {
    pub company: String,
    pub position: String,
    pub start: String,
    pub end: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Education {
    pub institution: String,
    pub degree: String,
    pub year: String,
}

/// User account as the rest of the service sees it.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub credential: Credential,
    pub role: Role,
    pub profile_image: Option<String>,
    pub title: Option<String>,
    pub location: Option<String>,
    pub phone: Option<String>,
    pub about: Option<String>,
    pub experience: Vec<Experience>,
    pub education: Vec<Education>,
    pub skills: Vec<String>,
    pub certifications: Vec<String>,
    pub resume: Option<String>,
    pub is_verified: bool,
    pub created_at: OffsetDateTime,
}

/// Fields needed to create an account; everything else starts empty.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub credential: Credential,
    pub role: Role,
    pub is_verified: bool,
}

impl NewUser {
    #[cfg(test)]
    pub(crate) fn into_user(self, id: Uuid, created_at: OffsetDateTime) -> User {
        User {
            id,
            name: self.name,
            email: self.email,
            credential: self.credential,
            role: self.role,
            profile_image: None,
            title: None,
            location: None,
            phone: None,
            about: None,
            experience: Vec::new(),
            education: Vec::new(),
            skills: Vec::new(),
            certifications: Vec::new(),
            resume: None,
            is_verified: self.is_verified,
            created_at,
        }
    }

    pub(crate) fn columns(&self) -> (AuthMethod, Option<String>, Option<String>) {
        self.credential.clone().into_columns()
    }
}

/// Row in the `users` table.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub google_id: Option<String>,
    pub auth_method: String,
    pub role: String,
    pub profile_image: Option<String>,
    pub title: Option<String>,
    pub location: Option<String>,
    pub phone: Option<String>,
    pub about: Option<String>,
    pub experience: Json<Vec<Experience>>,
    pub education: Json<Vec<Education>>,
    pub skills: Vec<String>,
    pub certifications: Vec<String>,
    pub resume: Option<String>,
    pub is_verified: bool,
    pub created_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let credential = match (row.auth_method.as_str(), row.password_hash, row.google_id) {
            ("local", Some(hash), _) => Credential::Password { hash },
            ("google", None, Some(subject)) => Credential::Google { subject },
            (method, _, _) => {
                anyhow::bail!("user {} has credentials inconsistent with {method:?}", row.id)
            }
        };
        Ok(User {
            id: row.id,
            name: row.name,
            email: row.email,
            credential,
            role: row.role.parse()?,
            profile_image: row.profile_image,
            title: row.title,
            location: row.location,
            phone: row.phone,
            about: row.about,
            experience: row.experience.0,
            education: row.education.0,
            skills: row.skills,
            certifications: row.certifications,
            resume: row.resume,
            is_verified: row.is_verified,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(auth_method: &str, hash: Option<&str>, google_id: Option<&str>) -> UserRow {
        UserRow {
            id: Uuid::new_v4(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password_hash: hash.map(str::to_string),
            google_id: google_id.map(str::to_string),
            auth_method: auth_method.into(),
            role: "employer".into(),
            profile_image: None,
            title: None,
            location: None,
            phone: None,
            about: None,
            experience: Json(vec![]),
            education: Json(vec![]),
            skills: vec!["Rust".into()],
            certifications: vec![],
            resume: None,
            is_verified: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn local_row_maps_to_password_credential() {
        let user = User::try_from(row("local", Some("$argon2id$x"), None)).unwrap();
        assert_eq!(
            user.credential,
            Credential::Password {
                hash: "$argon2id$x".into()
            }
        );
        assert_eq!(user.role, Role::Employer);
    }

    #[test]
    fn google_row_without_hash_maps_to_google_credential() {
        let user = User::try_from(row("google", None, Some("1234"))).unwrap();
        assert_eq!(user.credential.auth_method(), AuthMethod::Google);
    }

    #[test]
    fn inconsistent_rows_are_rejected() {
        assert!(User::try_from(row("local", None, Some("1234"))).is_err());
        assert!(User::try_from(row("google", Some("$argon2id$x"), Some("1"))).is_err());
    }

    #[test]
    fn role_parses_stored_names() {
        assert_eq!("jobSeeker".parse::<Role>().unwrap(), Role::JobSeeker);
        assert!("superuser".parse::<Role>().is_err());
        assert_eq!(Role::default().as_str(), "jobSeeker");
    }
}
