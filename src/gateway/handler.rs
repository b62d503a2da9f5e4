use actix_web::http::Method;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::api_contract::ErrorCode;
use crate::gateway::validation::{Validate, ValidationErrors, parse_body};
use crate::models::Principal;

/// Everything a handler may know about the request it serves.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub request_id: Uuid,
    pub principal: Principal,
    pub endpoint: String,
    pub method: Method,
    pub client_ip: String,
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),
    #[error("Upstream failure: {0}")]
    Upstream(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            HandlerError::Validation(_) => ErrorCode::ValidationFailed,
            HandlerError::Upstream(_) => ErrorCode::UpstreamFailure,
            HandlerError::NotFound(_) => ErrorCode::ResourceNotFound,
            HandlerError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn public_message(&self) -> String {
        match self {
            HandlerError::Validation(_) => "Request validation failed".to_string(),
            HandlerError::Upstream(_) => "Upstream service failed".to_string(),
            HandlerError::NotFound(msg) => msg.clone(),
            HandlerError::Internal(_) => "Internal server error".to_string(),
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            HandlerError::Validation(errors) => Some(errors.to_details()),
            _ => None,
        }
    }
}

/// A business endpoint with a typed, validated body.
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    type Body: DeserializeOwned + Validate + Send + 'static;

    async fn handle(&self, ctx: &HandlerContext, body: Self::Body) -> Result<Value, HandlerError>;
}

/// Body that already passed its endpoint's schema.
pub struct ValidatedBody(Box<dyn Any + Send>);

/// Type-erased [`Endpoint`], split so validation can run before auth.
#[async_trait]
pub trait Handler: Send + Sync {
    fn validate(&self, body: Value) -> Result<ValidatedBody, ValidationErrors>;

    async fn call(&self, ctx: &HandlerContext, body: ValidatedBody) -> Result<Value, HandlerError>;
}

struct TypedHandler<E>(E);

#[async_trait]
impl<E: Endpoint> Handler for TypedHandler<E> {
    fn validate(&self, body: Value) -> Result<ValidatedBody, ValidationErrors> {
        parse_body::<E::Body>(body).map(|body| ValidatedBody(Box::new(body)))
    }

    async fn call(&self, ctx: &HandlerContext, body: ValidatedBody) -> Result<Value, HandlerError> {
        let body = body
            .0
            .downcast::<E::Body>()
            .map_err(|_| anyhow::anyhow!("validated body does not belong to endpoint {}", ctx.endpoint))?;
        self.0.handle(ctx, *body).await
    }
}

/// Normalised path → handler.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: Endpoint>(&mut self, path: &str, endpoint: E) -> &mut Self {
        self.register_handler(path, Arc::new(TypedHandler(endpoint)))
    }

    pub fn register_handler(&mut self, path: &str, handler: Arc<dyn Handler>) -> &mut Self {
        let path = path.trim_matches('/').to_string();
        if self.handlers.insert(path.clone(), handler).is_some() {
            log::warn!("Handler for '{}' registered twice, keeping the last one", path);
        }
        self
    }

    pub fn get(&self, path: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(path).cloned()
    }

    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
