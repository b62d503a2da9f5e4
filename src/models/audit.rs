use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One row in `api_logs`. Created after the response is decided, never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiLogEntry {
    pub request_id: Uuid,
    pub user_id: Option<Uuid>,
    pub api_key_id: Option<Uuid>,
    pub masked_api_key: Option<String>,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub response_time_ms: i64,
    pub ip_address: String,
    pub user_agent: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub request_body: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// One row in `system_errors`, written only for unexpected handler failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_code: String,
    pub message: String,
    pub stack: Option<String>,
    pub source: String,
    pub context: Value,
    pub created_at: DateTime<Utc>,
}

/// Lightweight operational event (`system_events`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationalEvent {
    pub event_type: String,
    pub source: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}
