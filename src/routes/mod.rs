use actix_web::web;

use crate::handlers::{gateway_handler, health};

/// `/health` is answered directly; every other path goes through the gateway,
/// which owns prefix handling, CORS, and the not-found envelope.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health::health_check)));
    cfg.default_service(web::to(gateway_handler::gateway_entry));
}
