pub mod gateway_handler;
pub mod health;
pub mod upstream;

use crate::config::AppSettings;
use crate::error::AppError;
use crate::gateway::HandlerRegistry;

/// Builds the route table served behind the gateway.
pub fn build_registry(settings: &AppSettings) -> Result<HandlerRegistry, AppError> {
    let mut registry = HandlerRegistry::new();
    registry.register("self-test", self_test::SelfTest);

    match &settings.upstream {
        Some(upstream) => upstream::register_upstream_routes(&mut registry, upstream)?,
        None => log::warn!("UPSTREAM_BASE_URL not set, only built-in endpoints are served"),
    }

    Ok(registry)
}
