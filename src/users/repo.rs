use anyhow::Context;
use async_trait::async_trait;
use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use crate::assets::AssetKind;
use crate::profile::dto::ProfilePatch;
use crate::users::repo_types::{NewUser, User, UserRow};

const USER_COLUMNS: &str = "id, name, email, password_hash, google_id, auth_method, role, \
     profile_image, title, location, phone, about, experience, education, skills, \
     certifications, resume, is_verified, created_at";

const EMAIL_CONSTRAINT: &str = "users_email_key";

#[derive(Debug, thiserror::Error)]
pub enum InsertError {
    #[error("email already registered")]
    EmailTaken,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistent store of user accounts.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_google_id(&self, subject: &str) -> anyhow::Result<Option<User>>;
    /// Fails with [`InsertError::EmailTaken`] when the store already holds the email,
    /// even if the caller's own pre-check raced with another insert.
    async fn insert(&self, new: NewUser) -> Result<User, InsertError>;
    /// Returns `None` when no user has this id.
    async fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> anyhow::Result<Option<User>>;
    /// Points the user's asset field of `kind` at `path` (or clears it).
    async fn set_asset(
        &self,
        id: Uuid,
        kind: AssetKind,
        path: Option<&str>,
    ) -> anyhow::Result<Option<User>>;
}

pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn fetch_one_where(&self, clause: &str, value: &str) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {clause} = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("select user by {clause}"))?;
        row.map(User::try_from).transpose()
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("select user by id")?;
        row.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        self.fetch_one_where("email", email).await
    }

    async fn find_by_google_id(&self, subject: &str) -> anyhow::Result<Option<User>> {
        self.fetch_one_where("google_id", subject).await
    }

    async fn insert(&self, new: NewUser) -> Result<User, InsertError> {
        let (auth_method, password_hash, google_id) = new.columns();
        let sql = format!(
            r#"
            INSERT INTO users (id, name, email, password_hash, google_id, auth_method, role, is_verified)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}
            "#
        );
        let res = sqlx::query_as::<_, UserRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.name)
            .bind(&new.email)
            .bind(password_hash)
            .bind(google_id)
            .bind(auth_method.as_str())
            .bind(new.role.as_str())
            .bind(new.is_verified)
            .fetch_one(&self.db)
            .await;

        match res {
            Ok(row) => Ok(User::try_from(row)?),
            Err(sqlx::Error::Database(e))
                if e.is_unique_violation() && e.constraint() == Some(EMAIL_CONSTRAINT) =>
            {
                Err(InsertError::EmailTaken)
            }
            Err(e) => Err(anyhow::Error::new(e).context("insert user").into()),
        }
    }

    async fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> anyhow::Result<Option<User>> {
        // Nullable text columns take a "was provided" flag so that an explicit
        // null clears the column while an absent field leaves it alone.
        let sql = format!(
            r#"
            UPDATE users SET
                name           = COALESCE($2, name),
                title          = CASE WHEN $3 THEN $4 ELSE title END,
                location       = CASE WHEN $5 THEN $6 ELSE location END,
                phone          = CASE WHEN $7 THEN $8 ELSE phone END,
                about          = CASE WHEN $9 THEN $10 ELSE about END,
                experience     = COALESCE($11, experience),
                education      = COALESCE($12, education),
                skills         = COALESCE($13, skills),
                certifications = COALESCE($14, certifications)
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(patch.name.as_deref())
            .bind(patch.title.is_some())
            .bind(patch.title.clone().flatten())
            .bind(patch.location.is_some())
            .bind(patch.location.clone().flatten())
            .bind(patch.phone.is_some())
            .bind(patch.phone.clone().flatten())
            .bind(patch.about.is_some())
            .bind(patch.about.clone().flatten())
            .bind(patch.experience.clone().map(Json))
            .bind(patch.education.clone().map(Json))
            .bind(patch.skills.clone())
            .bind(patch.certifications.clone())
            .fetch_optional(&self.db)
            .await
            .context("update user profile")?;
        row.map(User::try_from).transpose()
    }

    async fn set_asset(
        &self,
        id: Uuid,
        kind: AssetKind,
        path: Option<&str>,
    ) -> anyhow::Result<Option<User>> {
        let column = match kind {
            AssetKind::Photo => "profile_image",
            AssetKind::Resume => "resume",
        };
        let sql = format!("UPDATE users SET {column} = $2 WHERE id = $1 RETURNING {USER_COLUMNS}");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(path)
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("update user {column}"))?;
        row.map(User::try_from).transpose()
    }
}

/// Keeps accounts in process memory. Backs the handler tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryUserRepository {
    users: tokio::sync::RwLock<Vec<User>>,
}

#[cfg(test)]
impl MemoryUserRepository {
    pub async fn count(&self) -> usize {
        self.users.read().await.len()
    }
}

#[cfg(test)]
#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.users.read().await.iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self.users.read().await.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_google_id(&self, subject: &str) -> anyhow::Result<Option<User>> {
        use crate::users::repo_types::Credential;
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|u| matches!(&u.credential, Credential::Google { subject: s } if s == subject))
            .cloned())
    }

    async fn insert(&self, new: NewUser) -> Result<User, InsertError> {
        let mut users = self.users.write().await;
        if users.iter().any(|u| u.email == new.email) {
            return Err(InsertError::EmailTaken);
        }
        let user = new.into_user(Uuid::new_v4(), time::OffsetDateTime::now_utc());
        users.push(user.clone());
        Ok(user)
    }

    async fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> anyhow::Result<Option<User>> {
        let mut users = self.users.write().await;
        Ok(users.iter_mut().find(|u| u.id == id).map(|u| {
            patch.apply_to(u);
            u.clone()
        }))
    }

    async fn set_asset(
        &self,
        id: Uuid,
        kind: AssetKind,
        path: Option<&str>,
    ) -> anyhow::Result<Option<User>> {
        let mut users = self.users.write().await;
        Ok(users.iter_mut().find(|u| u.id == id).map(|u| {
            let slot = match kind {
                AssetKind::Photo => &mut u.profile_image,
                AssetKind::Resume => &mut u.resume,
            };
            *slot = path.map(str::to_string);
            u.clone()
        }))
    }
}
