use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::models::ErrorRecord;

#[derive(Debug, Clone)]
pub struct SystemErrorRepository {
    pool: PgPool,
}

impl SystemErrorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, record: &ErrorRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO system_errors (error_code, message, stack, source, context, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&record.error_code)
        .bind(&record.message)
        .bind(&record.stack)
        .bind(&record.source)
        .bind(&record.context)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to insert system error: {}", e)))?;

        Ok(())
    }
}
