use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::{AuthMethod, Education, Experience, Role, User};

/// Public part of the user returned to the client. Never carries the
/// password hash or the federated subject.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
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
    pub auth_method: AuthMethod,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for UserView {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            auth_method: u.credential.auth_method(),
            name: u.name,
            email: u.email,
            role: u.role,
            profile_image: u.profile_image,
            title: u.title,
            location: u.location,
            phone: u.phone,
            about: u.about,
            experience: u.experience,
            education: u.education,
            skills: u.skills,
            certifications: u.certifications,
            resume: u.resume,
            is_verified: u.is_verified,
            created_at: u.created_at,
        }
    }
}

/// Keys a client may send but never change through `PUT /user/profile`.
const PROTECTED_FIELDS: &[&str] = &[
    "id",
    "_id",
    "email",
    "password",
    "passwordHash",
    "googleId",
    "role",
    "isVerified",
    "authMethod",
    "createdAt",
    "profileImage",
    "resume",
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("field '{0}' is protected")]
    Protected(String),
    #[error("Unknown profile field '{0}'")]
    Unknown(String),
    #[error("Profile update must be a JSON object")]
    NotAnObject,
    #[error("Name cannot be empty")]
    EmptyName,
    #[error("Invalid profile data: {0}")]
    Malformed(String),
}

/// Field-level changes to a profile. `None` leaves a field untouched; for the
/// optional text fields `Some(None)` clears the stored value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProfilePatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub title: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub location: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub about: Option<Option<String>>,
    pub experience: Option<Vec<Experience>>,
    pub education: Option<Vec<Education>>,
    pub skills: Option<Vec<String>>,
    pub certifications: Option<Vec<String>>,
}

fn present<'de, D, T>(d: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}

impl ProfilePatch {
    pub fn from_json(value: serde_json::Value) -> Result<Self, PatchError> {
        let serde_json::Value::Object(map) = &value else {
            return Err(PatchError::NotAnObject);
        };
        if let Some(key) = map.keys().find(|k| PROTECTED_FIELDS.contains(&k.as_str())) {
            return Err(PatchError::Protected(key.clone()));
        }
        const ALLOWED: &[&str] = &[
            "name",
            "title",
            "location",
            "phone",
            "about",
            "experience",
            "education",
            "skills",
            "certifications",
        ];
        if let Some(key) = map.keys().find(|k| !ALLOWED.contains(&k.as_str())) {
            return Err(PatchError::Unknown(key.clone()));
        }
        // Name is required, so unlike the optional text fields it cannot be cleared.
        if map.get("name").is_some_and(serde_json::Value::is_null) {
            return Err(PatchError::EmptyName);
        }

        let mut patch: ProfilePatch =
            serde_json::from_value(value).map_err(|e| PatchError::Malformed(e.to_string()))?;
        patch.normalize()?;
        Ok(patch)
    }

    fn normalize(&mut self) -> Result<(), PatchError> {
        if let Some(name) = self.name.as_mut() {
            *name = name.trim().to_string();
            if name.is_empty() {
                return Err(PatchError::EmptyName);
            }
        }
        if let Some(skills) = self.skills.take() {
            let mut seen = Vec::with_capacity(skills.len());
            for skill in skills {
                let skill = skill.trim().to_string();
                if !skill.is_empty() && !seen.contains(&skill) {
                    seen.push(skill);
                }
            }
            self.skills = Some(seen);
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        *self == ProfilePatch::default()
    }

    /// Applies the patch to an in-memory record.
    #[cfg(test)]
    pub fn apply_to(&self, user: &mut User) {
        if let Some(name) = &self.name {
            user.name = name.clone();
        }
        for (change, slot) in [
            (&self.title, &mut user.title),
            (&self.location, &mut user.location),
            (&self.phone, &mut user.phone),
            (&self.about, &mut user.about),
        ] {
            if let Some(value) = change {
                *slot = value.clone();
            }
        }
        if let Some(experience) = &self.experience {
            user.experience = experience.clone();
        }
        if let Some(education) = &self.education {
            user.education = education.clone();
        }
        if let Some(skills) = &self.skills {
            user.skills = skills.clone();
        }
        if let Some(certifications) = &self.certifications {
            user.certifications = certifications.clone();
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoUploaded {
    pub profile_image: String,
}

#[derive(Debug, Serialize)]
pub struct ResumeUploaded {
    pub resume: String,
}
