use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::config::settings::UpstreamConfig;
use crate::error::AppError;
use crate::gateway::{Endpoint, HandlerContext, HandlerError, HandlerRegistry, JsonObject};

/// Forwards a route's JSON body to the business backend on behalf of the principal.
pub struct UpstreamProxy {
    client: Client,
    url: String,
}

impl UpstreamProxy {
    pub fn new(client: Client, base_url: &str, path: &str) -> Self {
        Self {
            client,
            url: format!("{}/{}", base_url.trim_end_matches('/'), path.trim_matches('/')),
        }
    }
}

#[async_trait]
impl Endpoint for UpstreamProxy {
    type Body = JsonObject;

    async fn handle(&self, ctx: &HandlerContext, body: JsonObject) -> Result<Value, HandlerError> {
        debug!("Forwarding {} to upstream", ctx.endpoint);

        let mut request = self
            .client
            .post(&self.url)
            .header("X-CN-User-Id", ctx.principal.user_id.to_string())
            .header("X-CN-Request-Id", ctx.request_id.to_string())
            .json(&body);
        if let Some(api_key_id) = ctx.principal.api_key_id() {
            request = request.header("X-CN-Api-Key-Id", api_key_id.to_string());
        }

        let response = request.send().await.map_err(|e| {
            warn!("Upstream request for {} failed: {}", ctx.endpoint, e);
            HandlerError::Upstream(format!("request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Upstream returned HTTP {} for {}", status, ctx.endpoint);
            return Err(HandlerError::Upstream(format!("HTTP {}", status)));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| HandlerError::Upstream(format!("unreadable response: {}", e)))?;

        // Backends that already speak the envelope get unwrapped.
        match payload.get("success").and_then(Value::as_bool) {
            Some(true) => Ok(payload.get("data").cloned().unwrap_or(Value::Null)),
            Some(false) => Err(HandlerError::Upstream(
                payload
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("upstream reported failure")
                    .to_string(),
            )),
            None => Ok(payload),
        }
    }
}

/// Registers one [`UpstreamProxy`] per configured route, sharing a client.
pub fn register_upstream_routes(registry: &mut HandlerRegistry, config: &UpstreamConfig) -> Result<(), AppError> {
    let client = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| AppError::Configuration(format!("Failed to build upstream HTTP client: {}", e)))?;

    for route in &config.routes {
        registry.register(route, UpstreamProxy::new(client.clone(), &config.base_url, route));
    }
    log::info!("Registered {} upstream routes to {}", config.routes.len(), config.base_url);
    Ok(())
}
