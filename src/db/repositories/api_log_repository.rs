use sqlx::PgPool;
use sqlx::types::ipnetwork::IpNetwork;

use crate::error::{AppError, AppResult};
use crate::models::ApiLogEntry;

/// Append-only writer for `api_logs`.
#[derive(Debug, Clone)]
pub struct ApiLogRepository {
    pool: PgPool,
}

impl ApiLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, entry: &ApiLogEntry) -> AppResult<()> {
        // Addresses that do not parse (e.g. "unknown") are stored as NULL.
        let ip_address = entry.ip_address.parse::<IpNetwork>().ok();

        sqlx::query(
            r#"
            INSERT INTO api_logs (
                request_id, user_id, api_key_id, masked_api_key, endpoint, method,
                status_code, response_time_ms, ip_address, user_agent,
                error_code, error_message, request_body, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(entry.request_id)
        .bind(entry.user_id)
        .bind(entry.api_key_id)
        .bind(&entry.masked_api_key)
        .bind(&entry.endpoint)
        .bind(&entry.method)
        .bind(entry.status_code as i32)
        .bind(entry.response_time_ms)
        .bind(ip_address)
        .bind(&entry.user_agent)
        .bind(&entry.error_code)
        .bind(&entry.error_message)
        .bind(&entry.request_body)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to insert api log: {}", e)))?;

        Ok(())
    }
}
