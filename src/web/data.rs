use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{NewUser, UserRow};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a user with email `{0}` already exists")]
    DuplicateEmail(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Persistence port for registered users.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRow>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRow>, StoreError>;

    /// Insert a user, failing with `DuplicateEmail` when the email is taken.
    async fn insert(&self, user: NewUser) -> Result<UserRow, StoreError>;
}

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRow>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRow>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert(&self, user: NewUser) -> Result<UserRow, StoreError> {
        let result = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (id, username, email, password_hash) VALUES ($1, $2, $3, $4)
             RETURNING id, username, email, password_hash, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(row),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                Err(StoreError::DuplicateEmail(user.email))
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Process-local store used when no database is configured.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, UserRow>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRow>, StoreError> {
        Ok(self.users.read().await.get(email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRow>, StoreError> {
        let guard = self.users.read().await;
        Ok(guard.values().find(|user| user.id == id).cloned())
    }

    async fn insert(&self, user: NewUser) -> Result<UserRow, StoreError> {
        let mut guard = self.users.write().await;
        if guard.contains_key(&user.email) {
            return Err(StoreError::DuplicateEmail(user.email));
        }

        let row = UserRow {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email.clone(),
            password_hash: user.password_hash,
            created_at: Utc::now(),
        };
        guard.insert(user.email, row.clone());
        Ok(row)
    }
}
