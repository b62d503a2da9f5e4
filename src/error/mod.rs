use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use thiserror::Error;

use crate::api_contract::envelope::GatewayResponse;
use crate::api_contract::error_codes::ErrorCode;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Redis error: {0}")]
    Redis(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("External service error: {0}")]
    External(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Envelope code used when this error reaches a client.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AppError::Database(_) | AppError::Redis(_) | AppError::Internal(_) => ErrorCode::Internal,
            AppError::Serialization(_) => ErrorCode::Internal,
            AppError::Configuration(_) => ErrorCode::Misconfigured,
            AppError::External(_) => ErrorCode::UpstreamFailure,
            AppError::NotFound(_) => ErrorCode::ResourceNotFound,
        }
    }

    /// Message that is safe to show to a client. Internal detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Database(_) | AppError::Redis(_) | AppError::Internal(_) | AppError::Serialization(_) => {
                "Internal server error".to_string()
            }
            AppError::Configuration(_) => "Service is not configured correctly".to_string(),
            AppError::External(msg) | AppError::NotFound(msg) => msg.clone(),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.error_code().http_status()
    }

    fn error_response(&self) -> HttpResponse {
        log::error!("Request failed: {}", self);
        GatewayResponse::error(self.error_code(), self.public_message(), None).into_http_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => AppError::NotFound("Record not found".to_string()),
            _ => AppError::Database(error.to_string()),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(error: redis::RedisError) -> Self {
        AppError::Redis(error.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Serialization(format!("JSON deserialization/serialization error: {}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::External(error.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
