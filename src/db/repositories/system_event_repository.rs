use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::models::OperationalEvent;

#[derive(Debug, Clone)]
pub struct SystemEventRepository {
    pool: PgPool,
}

impl SystemEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, event: &OperationalEvent) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO system_events (event_type, source, payload, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&event.event_type)
        .bind(&event.source)
        .bind(&event.payload)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to insert system event: {}", e)))?;

        Ok(())
    }
}
