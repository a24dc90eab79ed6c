// Account service: registration, login, user administration.
//
// Passwords are hashed with bcrypt on the blocking pool; hashes never leave
// this module in responses.

use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::config;
use crate::database::manager::DatabaseError;
use crate::database::models::{User, UserProfile};
use crate::database::repository::Repository;
use crate::filter::FilterData;
use crate::uploads::{Attachment, FileIntake, IntakeError};

const USER_COLUMNS: &str = "id, name, email, password, role, phone, image, created_at, updated_at, deleted_at";

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("{field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("email already registered")]
    DuplicateEmail,

    #[error("no user with that email")]
    UnknownEmail,

    #[error("invalid credentials")]
    WrongPassword,

    #[error("user {0} not found")]
    NotFound(i64),

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error(transparent)]
    Intake(#[from] IntakeError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for AccountError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => AccountError::DuplicateEmail,
            _ => AccountError::Database(DatabaseError::Sqlx(err)),
        }
    }
}

/// Fields accepted by registration and the admin create form
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    pub phone: Option<String>,
}

/// Fields accepted by the admin update form. Password changes go through `change_password`.
#[derive(Debug, Clone, Default)]
pub struct AccountChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UserQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub search: Option<String>,
    pub user_id: Option<i64>,
}

pub struct UserService {
    users: Repository<User>,
    intake: Arc<dyn FileIntake>,
    bcrypt_cost: u32,
}

impl UserService {
    pub fn new(pool: PgPool, intake: Arc<dyn FileIntake>) -> Self {
        Self {
            users: Repository::new(pool),
            intake,
            bcrypt_cost: config().security.bcrypt_cost,
        }
    }

    /// Self-service signup; every field is mandatory
    pub async fn register(&self, account: NewAccount) -> Result<UserProfile, AccountError> {
        let name = required(account.name, "name")?;
        let email = required(account.email, "email")?;
        let password = required(account.password, "password")?;
        let role = required(account.role, "role")?;
        let phone = required(account.phone, "phone")?;

        let hash = hash_password(password, self.bcrypt_cost).await?;
        let user = self.insert(&name, &email, &hash, &role, Some(&phone), None).await?;
        info!(user_id = user.id, "user registered");
        Ok(user.into())
    }

    pub async fn login(&self, email: Option<String>, password: Option<String>) -> Result<UserProfile, AccountError> {
        let email = required(email, "email")?;
        let password = required(password, "password")?;

        let user = self
            .users
            .select_one(FilterData {
                where_clause: Some(json!({ "email": email })),
                ..Default::default()
            })
            .await?
            .ok_or(AccountError::UnknownEmail)?;

        if !verify_password(password, user.password.clone()).await? {
            return Err(AccountError::WrongPassword);
        }
        Ok(user.into())
    }

    pub async fn get(&self, user_id: i64) -> Result<User, AccountError> {
        self.users
            .select_one(FilterData {
                where_clause: Some(json!({ "id": user_id })),
                ..Default::default()
            })
            .await?
            .ok_or(AccountError::NotFound(user_id))
    }

    pub async fn list(&self, query: UserQuery) -> Result<Vec<User>, AccountError> {
        let where_clause = match (query.user_id, query.search.as_deref().map(str::trim)) {
            (Some(user_id), _) => Some(json!({ "id": user_id })),
            (None, Some(search)) if !search.is_empty() => {
                let pattern = like_pattern(search);
                Some(json!({
                    "$or": [
                        { "name": { "$ilike": pattern } },
                        { "phone": { "$ilike": pattern } },
                        { "email": { "$ilike": pattern } }
                    ]
                }))
            }
            _ => None,
        };

        let users = self
            .users
            .select_any(FilterData {
                where_clause,
                order: Some(json!("id desc")),
                limit: query.limit,
                offset: query.offset,
                ..Default::default()
            })
            .await?;
        Ok(users)
    }

    /// Admin create with optional profile image
    pub async fn create(&self, account: NewAccount, image: Option<Attachment>) -> Result<User, AccountError> {
        let name = required(account.name, "name")?;
        let email = required(account.email, "email")?;
        let password = required(account.password, "password")?;
        let role = required(account.role, "role")?;
        let phone = optional(account.phone);

        let hash = hash_password(password, self.bcrypt_cost).await?;
        let image_path = match image {
            Some(attachment) => Some(self.intake.persist(&attachment).await?),
            None => None,
        };

        let user = self
            .insert(&name, &email, &hash, &role, phone.as_deref(), image_path.as_deref())
            .await?;
        info!(user_id = user.id, "user created");
        Ok(user)
    }

    /// Overwrite profile fields. The stored image only changes when a new one is sent.
    pub async fn update(
        &self,
        user_id: i64,
        changes: AccountChanges,
        image: Option<Attachment>,
    ) -> Result<User, AccountError> {
        let name = required(changes.name, "name")?;
        let email = required(changes.email, "email")?;
        let role = required(changes.role, "role")?;
        let phone = optional(changes.phone);

        let image_path = match image {
            Some(attachment) => Some(self.intake.persist(&attachment).await?),
            None => None,
        };

        let sql = format!(
            "UPDATE users SET name = $1, email = $2, role = $3, phone = $4, image = COALESCE($5, image), updated_at = NOW()
             WHERE id = $6 AND deleted_at IS NULL RETURNING {}",
            USER_COLUMNS
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(&name)
            .bind(&email)
            .bind(&role)
            .bind(&phone)
            .bind(&image_path)
            .bind(user_id)
            .fetch_optional(self.users.pool())
            .await?
            .ok_or(AccountError::NotFound(user_id))?;
        Ok(user)
    }

    pub async fn delete(&self, user_id: i64) -> Result<(), AccountError> {
        match self.users.soft_delete(user_id).await {
            Err(DatabaseError::NotFound(_)) => Err(AccountError::NotFound(user_id)),
            other => Ok(other?),
        }
    }

    pub async fn change_password(&self, user_id: i64, password: Option<String>) -> Result<(), AccountError> {
        let password = required(password, "password")?;
        let hash = hash_password(password, self.bcrypt_cost).await?;

        let result = sqlx::query(
            "UPDATE users SET password = $1, updated_at = NOW() WHERE id = $2 AND deleted_at IS NULL",
        )
        .bind(&hash)
        .bind(user_id)
        .execute(self.users.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AccountError::NotFound(user_id));
        }
        info!(user_id, "password changed");
        Ok(())
    }

    async fn insert(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
        role: &str,
        phone: Option<&str>,
        image: Option<&str>,
    ) -> Result<User, AccountError> {
        let sql = format!(
            "INSERT INTO users (name, email, password, role, phone, image) VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            USER_COLUMNS
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(name)
            .bind(email)
            .bind(password_hash)
            .bind(role)
            .bind(phone)
            .bind(image)
            .fetch_one(self.users.pool())
            .await?;
        Ok(user)
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, AccountError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AccountError::Validation {
            field,
            message: "This field is required".to_string(),
        }),
    }
}

fn optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// `%term%` with LIKE metacharacters in the term escaped
pub(crate) fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

async fn hash_password(password: String, cost: u32) -> Result<String, AccountError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AccountError::Hash(e.to_string()))?
        .map_err(|e| AccountError::Hash(e.to_string()))
}

async fn verify_password(password: String, hash: String) -> Result<bool, AccountError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AccountError::Hash(e.to_string()))?
        .map_err(|e| AccountError::Hash(e.to_string()))
}
