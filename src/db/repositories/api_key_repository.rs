use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub key_hash: String,
    pub label: Option<String>,
    pub scope: Option<String>,
    pub rate_limit: Option<i32>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Configured per-key ceiling, if a positive one is set.
    pub fn configured_rate_limit(&self) -> Option<u64> {
        self.rate_limit.filter(|limit| *limit > 0).map(|limit| limit as u64)
    }
}

/// Read side of the credential store as seen by the gateway.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Looks a key up by digest, whatever its state. Active/expiry policy is the caller's job.
    async fn find_by_hash(&self, key_hash: &str) -> AppResult<Option<ApiKey>>;

    async fn touch_last_used(&self, id: &Uuid, at: DateTime<Utc>) -> AppResult<()>;
}

pub struct ApiKeyRepository {
    db_pool: PgPool,
}

impl ApiKeyRepository {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl ApiKeyStore for ApiKeyRepository {
    async fn find_by_hash(&self, key_hash: &str) -> AppResult<Option<ApiKey>> {
        sqlx::query_as::<_, ApiKey>(
            r#"
            SELECT id, user_id, key_hash, label, scope, rate_limit, active, created_at, last_used_at, expires_at
            FROM api_keys
            WHERE key_hash = $1
            "#,
        )
        .bind(key_hash)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(|e| {
            log::error!("Database error finding API key: {}", e);
            AppError::Database(format!("Failed to fetch API key: {}", e))
        })
    }

    async fn touch_last_used(&self, id: &Uuid, at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE api_keys
            SET last_used_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.db_pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to update API key usage: {}", e)))?;

        Ok(())
    }
}
