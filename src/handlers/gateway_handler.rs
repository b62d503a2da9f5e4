use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse, web};
use bytes::Bytes;
use futures_util::StreamExt;
use log::{error, warn};

use crate::api_contract::GatewayResponse;
use crate::gateway::{BodyError, Gateway, GatewayRequest};

/// Buffers the body up to `limit` bytes. A larger body is reported, not read.
async fn read_body(req: &HttpRequest, mut payload: web::Payload, limit: usize) -> Result<Bytes, BodyError> {
    let declared_len = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_len.is_some_and(|len| len > limit) {
        return Err(BodyError::TooLarge { limit });
    }

    let mut buffer = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| {
            warn!("Failed to read request body: {}", e);
            BodyError::Incomplete(e.to_string())
        })?;
        if buffer.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge { limit });
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

/// actix entry point for everything except `/health`.
///
/// Dispatch runs on its own task so a client disconnect cannot cancel it
/// halfway through the pipeline.
pub async fn gateway_entry(req: HttpRequest, payload: web::Payload, gateway: web::Data<Gateway>) -> HttpResponse {
    let body = read_body(&req, payload, gateway.max_body_bytes()).await;
    let request = GatewayRequest::new(
        req.method().clone(),
        req.path(),
        req.headers().clone(),
        Bytes::new(),
        req.peer_addr(),
    );
    let request = match body {
        Ok(body) => GatewayRequest { body, ..request },
        Err(problem) => request.with_body_error(problem),
    };
    let gateway = gateway.into_inner();

    match tokio::spawn(async move { gateway.dispatch(request).await }).await {
        Ok(response) => response.into_http_response(),
        Err(e) => {
            error!("Gateway dispatch task failed: {}", e);
            GatewayResponse::critical().into_http_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::{AuditConfig, RateLimitConfig, SinkBackend};
    use crate::gateway::HandlerRegistry;
    use crate::handlers::self_test::SelfTest;
    use crate::middleware::auth::testing::InMemoryApiKeyStore;
    use crate::middleware::{AdmissionController, AuthValidator, MemoryCounterStore};
    use crate::security::ApiKeyHasher;
    use crate::services::audit_service::testing::RecordingAuditStore;
    use crate::services::{AuditLogger, EventRecorder, LogAuditStore, LogEventSink};
    use actix_web::{App, test};
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn audit_config() -> AuditConfig {
        AuditConfig {
            backend: SinkBackend::Log,
            log_request_bodies: false,
            queue_capacity: 100,
            event_backend: SinkBackend::Log,
            event_queue_capacity: 100,
        }
    }

    fn gateway() -> Gateway {
        let (audit, _) = AuditLogger::start(Arc::new(LogAuditStore), &audit_config());
        gateway_with(audit)
    }

    fn gateway_with(audit: AuditLogger) -> Gateway {
        let (events, _) = EventRecorder::start(Arc::new(LogEventSink), "gateway", 100);
        let auth = AuthValidator::new(
            None,
            Arc::new(InMemoryApiKeyStore::default()),
            ApiKeyHasher::new("s"),
            "cn_",
        );
        let admission = AdmissionController::new(
            Arc::new(MemoryCounterStore::new(100)),
            RateLimitConfig::default(),
        );
        let mut registry = HandlerRegistry::new();
        registry.register("self-test", SelfTest);
        Gateway::new(auth, admission, audit, events, registry, "/api/")
    }

    #[actix_rt::test]
    async fn requests_flow_through_the_gateway() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(gateway()))
                .configure(crate::routes::configure_routes),
        )
        .await;

        let preflight = test::TestRequest::default()
            .method(actix_web::http::Method::OPTIONS)
            .uri("/api/self-test")
            .to_request();
        let resp = test::call_service(&app, preflight).await;
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(
            resp.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );

        let unauthenticated = test::TestRequest::post().uri("/api/self-test").to_request();
        let resp = test::call_service(&app, unauthenticated).await;
        assert_eq!(resp.status().as_u16(), 401);
        assert!(resp.headers().contains_key("x-request-id"));
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["code"], json!("CN-6000"));
        assert_eq!(body["data"], Value::Null);

        let unknown = test::TestRequest::get().uri("/api/nothing-here").to_request();
        let resp = test::call_service(&app, unknown).await;
        assert_eq!(resp.status().as_u16(), 404);

        let health = test::TestRequest::get().uri("/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, health).await;
        assert_eq!(body["status"], json!("ok"));
    }

    #[actix_rt::test]
    async fn oversized_body_gets_an_envelope_and_an_audit_entry() {
        let store = Arc::new(RecordingAuditStore::default());
        let (audit, worker) = AuditLogger::start(store.clone(), &audit_config());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(gateway_with(audit.clone()).with_max_body_bytes(16)))
                .configure(crate::routes::configure_routes),
        )
        .await;

        let oversized = test::TestRequest::post()
            .uri("/api/self-test")
            .set_payload(vec![b'x'; 64])
            .to_request();
        let resp = test::call_service(&app, oversized).await;
        assert_eq!(resp.status().as_u16(), 413);
        assert!(resp.headers().contains_key("x-request-id"));
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"]["code"], json!("CN-1002"));

        let small = test::TestRequest::post()
            .uri("/api/self-test")
            .set_payload("{}")
            .to_request();
        let resp = test::call_service(&app, small).await;
        assert_eq!(resp.status().as_u16(), 401);

        audit.shutdown();
        worker.await.unwrap();
        let logs = store.api_logs.lock().unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].status_code, 413);
        assert_eq!(logs[0].error_code.as_deref(), Some("CN-1002"));
        assert_eq!(logs[1].error_code.as_deref(), Some("CN-6000"));
    }
}
