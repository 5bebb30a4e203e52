//! Identity store: accounts, credential checks, and email → identity
//! resolution.

use std::sync::LazyLock;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::Serialize;
use tracing::Span;
use uuid::Uuid;
use validator::Validate;

use crate::entities::user::{self, Role};
use crate::error::{BlogError, Result};
use crate::storage::Storage;

/// Resolved account as seen by the rest of the system. Carries no secret.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

impl From<user::Model> for Identity {
    fn from(model: user::Model) -> Self {
        Self {
            id: model.id,
            email: model.email,
            role: model.role,
        }
    }
}

#[derive(Debug, Validate)]
pub struct NewUser {
    #[validate(email(message = "email must be a valid address"))]
    pub email: String,
    #[validate(length(min = 8, max = 128, message = "password must be 8 to 128 characters"))]
    pub password: String,
    pub role: String,
}

#[derive(Clone, Debug)]
pub struct IdentityStore {
    storage: Storage,
    log: Span,
}

impl IdentityStore {
    pub fn new(storage: Storage, log: Span) -> Self {
        Self { storage, log }
    }

    pub async fn create_user(&self, input: NewUser) -> Result<Identity> {
        input.validate()?;
        let role = Role::parse(&input.role)
            .ok_or_else(|| BlogError::validation(format!("unknown role {:?}", input.role)))?;
        let email = normalize_email(&input.email);
        let password_hash = hash_password(input.password).await?;

        self.storage
            .bounded(&self.log, "create_user", async {
                let txn = self.storage.conn().begin().await?;

                let taken = user::Entity::find()
                    .filter(user::Column::Email.eq(email.as_str()))
                    .one(&txn)
                    .await?;
                if taken.is_some() {
                    return Err(BlogError::DuplicateKey("email".to_string()));
                }

                let created = user::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    role: Set(role),
                    email: Set(email.clone()),
                    password: Set(password_hash),
                }
                .insert(&txn)
                .await?;
                txn.commit().await?;

                tracing::info!(user_id = %created.id, role = %created.role, "user created");
                Ok(Identity::from(created))
            })
            .await
    }

    /// Verify an email/password pair. Every failure mode, including an unknown
    /// email, reports `InvalidCredentials`.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Identity> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(BlogError::InvalidCredentials);
        }
        let email = normalize_email(email);

        let found = self
            .storage
            .bounded(&self.log, "authenticate", async {
                Ok(find_by_email(self.storage.conn(), &email).await?)
            })
            .await?;

        let Some(account) = found else {
            tracing::debug!("login attempt for unknown account");
            verify_against_dummy(password.to_string()).await;
            return Err(BlogError::InvalidCredentials);
        };

        verify_password(password.to_string(), account.password.clone()).await?;
        tracing::info!(user_id = %account.id, "user authenticated");
        Ok(Identity::from(account))
    }

    pub async fn resolve_by_email(&self, email: &str) -> Result<Identity> {
        let email = normalize_email(email);
        self.storage
            .bounded(&self.log, "resolve_by_email", async {
                find_by_email(self.storage.conn(), &email)
                    .await?
                    .map(Identity::from)
                    .ok_or_else(|| BlogError::NotFound("user".to_string()))
            })
            .await
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

async fn find_by_email<C: ConnectionTrait>(conn: &C, email: &str) -> Result<Option<user::Model>> {
    Ok(user::Entity::find()
        .filter(user::Column::Email.eq(email))
        .one(conn)
        .await?)
}

/// Re-resolve a caller by email and role against storage. Ownership checks
/// must go through this rather than trusting the token's id alone.
pub(crate) async fn resolve_scoped<C: ConnectionTrait>(
    conn: &C,
    caller: &Identity,
    role: Role,
) -> Result<user::Model> {
    if caller.email.trim().is_empty() {
        return Err(BlogError::unauthorized("caller email is empty"));
    }
    let found = user::Entity::find()
        .filter(user::Column::Email.eq(normalize_email(&caller.email)))
        .filter(user::Column::Role.eq(role))
        .one(conn)
        .await?;
    found.ok_or_else(|| BlogError::unauthorized(format!("caller is not a known {role}")))
}

/// Argon2id with a fresh random salt; runs off the async executor.
pub async fn hash_password(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| BlogError::Internal(format!("failed to hash password: {e}")))
    })
    .await?
}

pub async fn verify_password(password: String, stored: String) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&stored)
            .map_err(|_| BlogError::Internal("stored password hash is malformed".to_string()))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| BlogError::InvalidCredentials)
    })
    .await?
}

/// Hash checked when the email is unknown, so that path costs the same
/// argon2 work as a wrong password.
static DUMMY_HASH: LazyLock<Option<String>> = LazyLock::new(|| {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(b"no account has this password", &salt)
        .map(|hash| hash.to_string())
        .ok()
});

async fn verify_against_dummy(password: String) {
    let outcome = tokio::task::spawn_blocking(move || {
        let Some(stored) = DUMMY_HASH.as_deref() else {
            return;
        };
        if let Ok(parsed) = PasswordHash::new(stored) {
            let _ = Argon2::default().verify_password(password.as_bytes(), &parsed);
        }
    })
    .await;
    if let Err(err) = outcome {
        tracing::warn!(error = %err, "dummy password verification task failed");
    }
}
