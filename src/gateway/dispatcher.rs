use actix_web::http::Method;
use chrono::Utc;
use futures_util::FutureExt;
use log::{debug, error, info};
use serde_json::{Value, json};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use uuid::Uuid;

use crate::api_contract::{ErrorCode, GatewayResponse};
use crate::gateway::handler::{HandlerContext, HandlerError, HandlerRegistry};
use crate::gateway::request::{BodyError, GatewayRequest, normalize_path};
use crate::middleware::{AdmissionController, AdmissionDecision, AuthValidator, Rejection, TierStatus};
use crate::models::{ApiLogEntry, ErrorRecord, Principal};
use crate::services::{AuditLogger, EventRecorder, EventType};

/// What the audit entry needs to know about a request once it is answered.
#[derive(Default)]
struct RequestTrace {
    principal: Option<Principal>,
    masked_api_key: Option<String>,
    request_body: Option<Value>,
}

/// Single entry point for every API call.
///
/// Order per request: preflight short-circuit, route lookup, body parsing and
/// schema validation, authentication, admission, handler. Whatever happens,
/// the response is followed by exactly one audit entry (preflight excepted).
pub struct Gateway {
    auth: AuthValidator,
    admission: AdmissionController,
    audit: AuditLogger,
    events: EventRecorder,
    registry: HandlerRegistry,
    path_prefix: String,
    max_body_bytes: usize,
    trusted_proxy_hops: usize,
}

pub const DEFAULT_MAX_BODY_BYTES: usize = 1_048_576;

impl Gateway {
    pub fn new(
        auth: AuthValidator,
        admission: AdmissionController,
        audit: AuditLogger,
        events: EventRecorder,
        registry: HandlerRegistry,
        path_prefix: impl Into<String>,
    ) -> Self {
        Self {
            auth,
            admission,
            audit,
            events,
            registry,
            path_prefix: path_prefix.into(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            trusted_proxy_hops: 0,
        }
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Number of reverse proxies whose `X-Forwarded-For` entries are believed.
    pub fn with_trusted_proxy_hops(mut self, hops: usize) -> Self {
        self.trusted_proxy_hops = hops;
        self
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    pub async fn dispatch(&self, request: GatewayRequest) -> GatewayResponse {
        if request.method == Method::OPTIONS {
            return GatewayResponse::preflight();
        }

        let started = Instant::now();
        let request_id = Uuid::new_v4();
        let endpoint = normalize_path(&request.path, &self.path_prefix);
        let client_ip = request.client_ip(self.trusted_proxy_hops);
        let mut trace = RequestTrace::default();

        let response = self
            .process(&request, &endpoint, request_id, &client_ip, &mut trace)
            .await
            .with_header("X-Request-Id", request_id.to_string());
        let elapsed_ms = started.elapsed().as_millis() as i64;

        self.audit.record_request(ApiLogEntry {
            request_id,
            user_id: trace.principal.as_ref().map(|p| p.user_id),
            api_key_id: trace.principal.as_ref().and_then(Principal::api_key_id),
            masked_api_key: trace.masked_api_key,
            endpoint,
            method: request.method.to_string(),
            status_code: response.status().as_u16(),
            response_time_ms: elapsed_ms,
            ip_address: client_ip,
            user_agent: request.user_agent(),
            error_code: response.error_code().map(|c| c.as_str().to_string()),
            error_message: response.error_message().map(str::to_string),
            request_body: trace.request_body,
            created_at: Utc::now(),
        });

        response
    }

    fn body_problem(&self, request: &GatewayRequest) -> Option<BodyError> {
        match &request.body_error {
            Some(problem) => Some(problem.clone()),
            None if request.body.len() > self.max_body_bytes => Some(BodyError::TooLarge {
                limit: self.max_body_bytes,
            }),
            None => None,
        }
    }

    async fn process(
        &self,
        request: &GatewayRequest,
        endpoint: &str,
        request_id: Uuid,
        client_ip: &str,
        trace: &mut RequestTrace,
    ) -> GatewayResponse {
        let Some(handler) = self.registry.get(endpoint) else {
            debug!("No handler for endpoint '{}'", endpoint);
            return GatewayResponse::error(
                ErrorCode::EndpointNotFound,
                format!("Endpoint '{}' not found", endpoint),
                None,
            );
        };

        if let Some(problem) = self.body_problem(request) {
            return match problem {
                BodyError::TooLarge { limit } => {
                    debug!("Body for {} exceeds {} bytes", endpoint, limit);
                    GatewayResponse::error(
                        ErrorCode::PayloadTooLarge,
                        format!("Request body exceeds {} bytes", limit),
                        Some(json!({ "limitBytes": limit })),
                    )
                }
                BodyError::Incomplete(reason) => {
                    debug!("Body for {} could not be read: {}", endpoint, reason);
                    GatewayResponse::error(ErrorCode::InvalidJson, "Request body could not be read", None)
                }
            };
        }

        let body = match parse_json_body(&request.body) {
            Ok(body) => body,
            Err(e) => {
                debug!("Invalid JSON body for {}: {}", endpoint, e);
                return GatewayResponse::error(ErrorCode::InvalidJson, "Request body is not valid JSON", None);
            }
        };
        if self.audit.should_log_body(request.method.as_str()) {
            trace.request_body = Some(body.clone());
        }

        let validated = match handler.validate(body) {
            Ok(validated) => validated,
            Err(errors) => {
                return GatewayResponse::error(
                    ErrorCode::ValidationFailed,
                    "Request validation failed",
                    Some(errors.to_details()),
                );
            }
        };

        let authorization = request.authorization();
        trace.masked_api_key = self.auth.masked_key_from_header(authorization);
        let principal = match self.auth.authenticate(authorization).await {
            Ok(principal) => principal,
            Err(failure) => {
                self.events.record(
                    EventType::AuthFailed,
                    json!({
                        "endpoint": endpoint,
                        "code": failure.error_code(),
                        "ip": client_ip,
                        "requestId": request_id,
                    }),
                );
                return GatewayResponse::error(failure.error_code(), failure.to_string(), None);
            }
        };
        trace.principal = Some(principal.clone());

        let status = match self.admission.check(&principal, client_ip).await {
            AdmissionDecision::Admitted(status) => status,
            AdmissionDecision::Rejected(rejection) => {
                self.events.record(
                    EventType::RateLimited,
                    json!({
                        "endpoint": endpoint,
                        "code": rejection.error_code(),
                        "tier": rejection.tier,
                        "userId": principal.user_id,
                        "apiKeyId": principal.api_key_id(),
                        "requestId": request_id,
                    }),
                );
                return rejection_response(&rejection);
            }
        };

        self.events.record(
            EventType::Request,
            json!({
                "endpoint": endpoint,
                "method": request.method.as_str(),
                "userId": principal.user_id,
                "apiKeyId": principal.api_key_id(),
                "requestId": request_id,
            }),
        );

        let ctx = HandlerContext {
            request_id,
            principal,
            endpoint: endpoint.to_string(),
            method: request.method.clone(),
            client_ip: client_ip.to_string(),
        };

        let outcome = AssertUnwindSafe(handler.call(&ctx, validated)).catch_unwind().await;
        let response = match outcome {
            Ok(Ok(data)) => GatewayResponse::success(&data),
            Ok(Err(HandlerError::Internal(e))) => self.internal_failure(&ctx, e.to_string(), format!("{:?}", e)),
            Ok(Err(e)) => {
                info!("Handler {} returned {}: {}", endpoint, e.error_code(), e);
                GatewayResponse::error(e.error_code(), e.public_message(), e.details())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                self.internal_failure(&ctx, format!("handler panicked: {}", message), format!("panic: {}", message))
            }
        };

        with_rate_limit_headers(response, &status)
    }

    fn internal_failure(&self, ctx: &HandlerContext, message: String, stack: String) -> GatewayResponse {
        error!("Handler {} failed (request {}): {}", ctx.endpoint, ctx.request_id, message);

        let context = json!({
            "endpoint": ctx.endpoint,
            "method": ctx.method.as_str(),
            "userId": ctx.principal.user_id,
            "apiKeyId": ctx.principal.api_key_id(),
            "requestId": ctx.request_id,
        });
        self.audit.record_error(ErrorRecord {
            error_code: ErrorCode::Internal.as_str().to_string(),
            message,
            stack: Some(stack),
            source: ctx.endpoint.clone(),
            context: context.clone(),
            created_at: Utc::now(),
        });
        self.events.record(EventType::Error, context);

        GatewayResponse::error(ErrorCode::Internal, "Internal server error", None)
    }
}

fn parse_json_body(body: &[u8]) -> Result<Value, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    serde_json::from_slice(body)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn with_rate_limit_headers(response: GatewayResponse, status: &TierStatus) -> GatewayResponse {
    response
        .with_header("X-RateLimit-Limit", status.limit.to_string())
        .with_header("X-RateLimit-Remaining", status.remaining.to_string())
        .with_header("X-RateLimit-Reset", status.reset_at.timestamp().to_string())
}

fn rejection_response(rejection: &Rejection) -> GatewayResponse {
    let mut response = GatewayResponse::error(rejection.error_code(), rejection.message(), Some(rejection.details()))
        .with_header("Retry-After", rejection.retry_after_secs(Utc::now()).to_string());
    if rejection.tier.is_some() {
        response = response
            .with_header("X-RateLimit-Limit", rejection.limit.to_string())
            .with_header("X-RateLimit-Remaining", "0")
            .with_header("X-RateLimit-Reset", rejection.reset_at.timestamp().to_string());
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::{AuditConfig, RateLimitConfig, SinkBackend, TierLimit};
    use crate::error::AppError;
    use crate::gateway::handler::Endpoint;
    use crate::gateway::validation::{Validate, ValidationErrors, require_non_blank};
    use crate::middleware::auth::testing::{InMemoryApiKeyStore, StaticSessionVerifier, api_key_record};
    use crate::middleware::rate_limit_storage::{CounterSpec, CounterStore, IncrementOutcome, MemoryCounterStore};
    use crate::security::ApiKeyHasher;
    use crate::services::audit_service::testing::RecordingAuditStore;
    use crate::services::event_recorder::testing::RecordingEventSink;
    use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
    use async_trait::async_trait;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    const SESSION: &str = "Bearer session-token";

    #[derive(Deserialize)]
    struct EchoBody {
        name: String,
    }

    impl Validate for EchoBody {
        fn validate(&self) -> Result<(), ValidationErrors> {
            let mut errors = ValidationErrors::new();
            require_non_blank(&mut errors, "name", &self.name);
            errors.into_result()
        }
    }

    struct Echo;

    #[async_trait]
    impl Endpoint for Echo {
        type Body = EchoBody;

        async fn handle(&self, ctx: &HandlerContext, body: EchoBody) -> Result<Value, HandlerError> {
            Ok(json!({ "name": body.name, "userId": ctx.principal.user_id }))
        }
    }

    #[derive(Deserialize, Default)]
    struct AnyBody {}

    impl Validate for AnyBody {}

    enum Broken {
        Panics,
        Fails,
        Missing,
        Upstream,
    }

    #[async_trait]
    impl Endpoint for Broken {
        type Body = AnyBody;

        async fn handle(&self, _ctx: &HandlerContext, _body: AnyBody) -> Result<Value, HandlerError> {
            match self {
                Broken::Panics => panic!("secret stack detail"),
                Broken::Fails => Err(anyhow::anyhow!("db password=hunter2 rejected").into()),
                Broken::Missing => Err(HandlerError::NotFound("Claim not found".to_string())),
                Broken::Upstream => Err(HandlerError::Upstream("backend returned 500".to_string())),
            }
        }
    }

    struct FailingCounters;

    #[async_trait]
    impl CounterStore for FailingCounters {
        async fn increment(&self, _: &[CounterSpec], _: &[String]) -> Result<IncrementOutcome, AppError> {
            Err(AppError::Redis("connection refused".to_string()))
        }

        async fn block(&self, _: &str, _: Duration) -> Result<(), AppError> {
            Ok(())
        }
    }

    struct Harness {
        gateway: Gateway,
        audit: AuditLogger,
        events: EventRecorder,
        workers: Vec<JoinHandle<()>>,
        audit_store: Arc<RecordingAuditStore>,
        event_sink: Arc<RecordingEventSink>,
        counters: Arc<MemoryCounterStore>,
        keys: Arc<InMemoryApiKeyStore>,
        hasher: ApiKeyHasher,
        user_id: Uuid,
    }

    impl Harness {
        fn new(rate_limits: RateLimitConfig) -> Self {
            Self::with_counter_store(rate_limits, None)
        }

        fn with_counter_store(rate_limits: RateLimitConfig, store: Option<Arc<dyn CounterStore>>) -> Self {
            let audit_store = Arc::new(RecordingAuditStore::default());
            let event_sink = Arc::new(RecordingEventSink::default());
            let audit_config = AuditConfig {
                backend: SinkBackend::Log,
                log_request_bodies: true,
                queue_capacity: 1_000,
                event_backend: SinkBackend::Log,
                event_queue_capacity: 1_000,
            };
            let (audit, audit_worker) = AuditLogger::start(audit_store.clone(), &audit_config);
            let (events, event_worker) = EventRecorder::start(event_sink.clone(), "gateway", 1_000);

            let hasher = ApiKeyHasher::new("test-secret");
            let keys = Arc::new(InMemoryApiKeyStore::default());
            let user_id = Uuid::new_v4();
            let sessions = Arc::new(StaticSessionVerifier {
                token: "session-token".to_string(),
                user_id,
            });
            let auth = AuthValidator::new(Some(sessions), keys.clone(), hasher.clone(), "cn_");

            let counters = Arc::new(MemoryCounterStore::new(10_000));
            let store: Arc<dyn CounterStore> = store.unwrap_or_else(|| counters.clone() as Arc<dyn CounterStore>);
            let admission = AdmissionController::new(store, rate_limits);

            let mut registry = HandlerRegistry::new();
            registry
                .register("echo", Echo)
                .register("panics", Broken::Panics)
                .register("fails", Broken::Fails)
                .register("missing", Broken::Missing)
                .register("upstream", Broken::Upstream);

            Self {
                gateway: Gateway::new(auth, admission, audit.clone(), events.clone(), registry, "/api/")
                    .with_trusted_proxy_hops(1),
                audit,
                events,
                workers: vec![audit_worker, event_worker],
                audit_store,
                event_sink,
                counters,
                keys,
                hasher,
                user_id,
            }
        }

        async fn send(&self, method: Method, path: &str, auth: Option<&str>, body: &str) -> GatewayResponse {
            let mut headers = HeaderMap::new();
            if let Some(auth) = auth {
                headers.insert(HeaderName::from_static("authorization"), HeaderValue::from_str(auth).unwrap());
            }
            headers.insert(HeaderName::from_static("x-forwarded-for"), HeaderValue::from_static("203.0.113.5"));
            let request = GatewayRequest::new(method, path, headers, Bytes::from(body.to_string()), None);
            self.gateway.dispatch(request).await
        }

        async fn send_from(&self, peer: &str, forwarded_for: &str) -> GatewayResponse {
            let mut headers = HeaderMap::new();
            headers.insert(HeaderName::from_static("authorization"), HeaderValue::from_static(SESSION));
            headers.insert(HeaderName::from_static("x-forwarded-for"), HeaderValue::from_str(forwarded_for).unwrap());
            let body = Bytes::from_static(br#"{"name":"Ada"}"#);
            let request = GatewayRequest::new(Method::POST, "/api/echo", headers, body, Some(peer.parse().unwrap()));
            self.gateway.dispatch(request).await
        }

        /// Stops the background workers so every queued record is visible.
        async fn flush(&mut self) {
            self.audit.shutdown();
            self.events.shutdown();
            for worker in self.workers.drain(..) {
                worker.await.unwrap();
            }
        }
    }

    fn generous_limits() -> RateLimitConfig {
        RateLimitConfig {
            per_user: TierLimit { max_requests: 1_000, window_secs: 60 },
            per_api_key: TierLimit { max_requests: 1_000, window_secs: 60 },
            per_origin: TierLimit { max_requests: 1_000, window_secs: 60 },
            burst: TierLimit { max_requests: 1_000, window_secs: 10 },
            ..RateLimitConfig::default()
        }
    }

    #[tokio::test]
    async fn preflight_touches_nothing() {
        let mut h = Harness::new(generous_limits());
        let response = h.send(Method::OPTIONS, "/api/echo", None, "").await;

        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.header("Access-Control-Allow-Origin"), Some("*"));
        assert!(response.body().is_empty());

        h.flush().await;
        assert!(h.counters.is_empty());
        assert!(h.audit_store.api_logs.lock().unwrap().is_empty());
        assert!(h.event_sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_endpoint_is_404_without_auth() {
        let mut h = Harness::new(generous_limits());
        let response = h.send(Method::POST, "/api/nope", None, "{}").await;

        assert_eq!(response.status().as_u16(), 404);
        assert_eq!(response.error_code(), Some(ErrorCode::EndpointNotFound));

        h.flush().await;
        let logs = h.audit_store.api_logs.lock().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status_code, 404);
        assert!(h.event_sink.types().is_empty(), "auth was never consulted");
    }

    #[tokio::test]
    async fn malformed_json_and_schema_errors_consume_no_quota() {
        let mut h = Harness::new(generous_limits());

        let bad_json = h.send(Method::POST, "/api/echo", Some(SESSION), "{not json").await;
        assert_eq!(bad_json.error_code(), Some(ErrorCode::InvalidJson));
        assert_eq!(bad_json.status().as_u16(), 400);

        let invalid = h.send(Method::POST, "/api/echo", Some(SESSION), r#"{"name": "  "}"#).await;
        assert_eq!(invalid.error_code(), Some(ErrorCode::ValidationFailed));
        assert_eq!(
            invalid.json().unwrap()["error"]["details"],
            json!({"errors": [{"field": "name", "message": "must not be empty"}]})
        );

        h.flush().await;
        assert!(h.counters.is_empty());
        assert_eq!(h.audit_store.api_logs.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_or_malformed_credentials_are_401_and_touch_no_counter() {
        let mut h = Harness::new(generous_limits());

        let missing = h.send(Method::POST, "/api/echo", None, r#"{"name":"a"}"#).await;
        assert_eq!(missing.status().as_u16(), 401);
        assert_eq!(missing.error_code(), Some(ErrorCode::MissingAuthorization));

        let malformed = h.send(Method::POST, "/api/echo", Some("Token abc"), r#"{"name":"a"}"#).await;
        assert_eq!(malformed.error_code(), Some(ErrorCode::MalformedAuthorization));

        let invalid = h.send(Method::POST, "/api/echo", Some("Bearer nope"), r#"{"name":"a"}"#).await;
        assert_eq!(invalid.error_code(), Some(ErrorCode::InvalidSession));

        h.flush().await;
        assert!(h.counters.is_empty());
        assert_eq!(h.event_sink.types(), vec!["api.auth_failed"; 3]);
        assert_eq!(h.audit_store.api_logs.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn admitted_request_runs_the_handler() {
        let mut h = Harness::new(generous_limits());
        let response = h.send(Method::POST, "/api/echo/", Some(SESSION), r#"{"name":"Ada"}"#).await;

        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(
            response.json().unwrap(),
            json!({"success": true, "data": {"name": "Ada", "userId": h.user_id}})
        );
        assert_eq!(response.header("X-RateLimit-Limit"), Some("1000"));
        assert_eq!(response.header("X-RateLimit-Remaining"), Some("999"));
        let request_id = response.header("X-Request-Id").unwrap().to_string();

        h.flush().await;
        let logs = h.audit_store.api_logs.lock().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].request_id.to_string(), request_id);
        assert_eq!(logs[0].endpoint, "echo");
        assert_eq!(logs[0].user_id, Some(h.user_id));
        assert_eq!(logs[0].ip_address, "203.0.113.5");
        assert_eq!(logs[0].request_body, Some(json!({"name": "Ada"})));
        assert_eq!(logs[0].error_code, None);
        assert_eq!(h.event_sink.types(), vec!["api.request"]);
    }

    #[tokio::test]
    async fn legacy_prefix_reaches_the_same_handler() {
        let h = Harness::new(generous_limits());
        let response = h
            .send(Method::POST, "/.netlify/functions/api/echo", Some(SESSION), r#"{"name":"x"}"#)
            .await;
        assert_eq!(response.status().as_u16(), 200);
    }

    #[tokio::test]
    async fn rate_limited_api_key_gets_retry_metadata() {
        let mut h = Harness::new(generous_limits());
        let record = api_key_record(&h.hasher, "cn_live_limited", Some(2));
        h.keys.insert(record.clone());
        let auth = Some("Bearer cn_live_limited");

        for _ in 0..2 {
            let ok = h.send(Method::POST, "/api/echo", auth, r#"{"name":"a"}"#).await;
            assert_eq!(ok.status().as_u16(), 200);
        }
        let limited = h.send(Method::POST, "/api/echo", auth, r#"{"name":"a"}"#).await;

        assert_eq!(limited.status().as_u16(), 429);
        assert_eq!(limited.error_code(), Some(ErrorCode::RateLimitExceeded));
        let details = &limited.json().unwrap()["error"]["details"];
        assert_eq!(details["remaining"], json!(0));
        assert_eq!(details["tier"], json!("api_key"));
        assert!(details["resetAt"].as_str().unwrap().ends_with('Z'));
        let retry_after: u64 = limited.header("Retry-After").unwrap().parse().unwrap();
        assert!((1..=60).contains(&retry_after));

        h.flush().await;
        let logs = h.audit_store.api_logs.lock().unwrap();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[2].api_key_id, Some(record.id));
        assert_eq!(logs[2].masked_api_key.as_deref(), Some("cn_l***"));
        assert_eq!(logs[2].error_code.as_deref(), Some("CN-4000"));
        assert!(h.event_sink.types().contains(&"api.rate_limited".to_string()));
    }

    #[tokio::test]
    async fn rotating_forwarded_for_cannot_dodge_the_origin_tier() {
        let mut h = Harness::new(RateLimitConfig {
            per_origin: TierLimit { max_requests: 2, window_secs: 60 },
            ..generous_limits()
        });
        h.gateway.trusted_proxy_hops = 0;

        let mut statuses = Vec::new();
        for i in 0..5 {
            let response = h.send_from("198.51.100.7:40000", &format!("203.0.113.{}", i)).await;
            statuses.push(response.status().as_u16());
            if i == 4 {
                assert_eq!(response.json().unwrap()["error"]["details"]["tier"], json!("origin"));
            }
        }
        assert_eq!(statuses, vec![200u16, 200, 429, 429, 429]);

        h.flush().await;
        let logs = h.audit_store.api_logs.lock().unwrap();
        assert!(logs.iter().all(|log| log.ip_address == "198.51.100.7"));
    }

    #[tokio::test]
    async fn behind_one_proxy_the_spoofed_prefix_is_ignored() {
        let h = Harness::new(RateLimitConfig {
            per_origin: TierLimit { max_requests: 2, window_secs: 60 },
            ..generous_limits()
        });

        let mut statuses = Vec::new();
        for i in 0..3 {
            let forwarded_for = format!("10.9.9.{}, 203.0.113.9", i);
            statuses.push(h.send_from("10.0.0.1:5000", &forwarded_for).await.status().as_u16());
        }
        assert_eq!(statuses, vec![200u16, 200, 429]);
    }

    #[tokio::test]
    async fn oversized_body_is_enveloped_and_audited_without_touching_quota() {
        let mut h = Harness::new(generous_limits());
        h.gateway.max_body_bytes = 16;
        let body = format!(r#"{{"name":"{}"}}"#, "x".repeat(64));
        let response = h.send(Method::POST, "/api/echo", Some(SESSION), &body).await;

        assert_eq!(response.status().as_u16(), 413);
        assert_eq!(response.error_code(), Some(ErrorCode::PayloadTooLarge));
        assert_eq!(response.json().unwrap()["error"]["details"], json!({"limitBytes": 16}));
        assert!(response.header("X-Request-Id").is_some());

        h.flush().await;
        assert!(h.counters.is_empty());
        let logs = h.audit_store.api_logs.lock().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status_code, 413);
        assert_eq!(logs[0].error_code.as_deref(), Some("CN-1002"));
        assert!(h.event_sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreadable_body_is_a_json_error() {
        let mut h = Harness::new(generous_limits());
        let request = GatewayRequest::new(Method::POST, "/api/echo", HeaderMap::new(), Bytes::new(), None)
            .with_body_error(BodyError::Incomplete("connection reset".to_string()));
        let response = h.gateway.dispatch(request).await;

        assert_eq!(response.status().as_u16(), 400);
        assert_eq!(response.error_code(), Some(ErrorCode::InvalidJson));
        h.flush().await;
        assert_eq!(h.audit_store.api_logs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_api_key_is_rejected_every_time() {
        let mut h = Harness::new(generous_limits());
        let mut record = api_key_record(&h.hasher, "cn_live_old", None);
        record.expires_at = Some(Utc::now() - chrono::Duration::days(1));
        h.keys.insert(record);

        for _ in 0..5 {
            let response = h.send(Method::POST, "/api/echo", Some("ApiKey cn_live_old"), r#"{"name":"a"}"#).await;
            assert_eq!(response.status().as_u16(), 401);
            assert_eq!(response.error_code(), Some(ErrorCode::ExpiredApiKey));
        }

        h.flush().await;
        assert!(h.counters.is_empty());
    }

    #[tokio::test]
    async fn handler_panic_becomes_a_generic_500_with_one_error_record() {
        let mut h = Harness::new(generous_limits());
        let response = h.send(Method::POST, "/api/panics", Some(SESSION), "").await;

        assert_eq!(response.status().as_u16(), 500);
        assert_eq!(response.error_code(), Some(ErrorCode::Internal));
        let body = String::from_utf8(response.body().to_vec()).unwrap();
        assert!(!body.contains("secret stack detail"));

        h.flush().await;
        let errors = h.audit_store.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].source, "panics");
        assert!(errors[0].stack.as_deref().unwrap().contains("secret stack detail"));
        assert_eq!(h.audit_store.api_logs.lock().unwrap().len(), 1);
        assert_eq!(h.event_sink.types(), vec!["api.request", "api.error"]);
    }

    #[tokio::test]
    async fn internal_errors_never_leak_their_message() {
        let mut h = Harness::new(generous_limits());
        let response = h.send(Method::POST, "/api/fails", Some(SESSION), "{}").await;

        assert_eq!(response.status().as_u16(), 500);
        let body = String::from_utf8(response.body().to_vec()).unwrap();
        assert!(!body.contains("hunter2"));

        h.flush().await;
        assert_eq!(h.audit_store.errors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expected_handler_errors_keep_their_codes() {
        let mut h = Harness::new(generous_limits());

        let missing = h.send(Method::GET, "/api/missing", Some(SESSION), "").await;
        assert_eq!(missing.status().as_u16(), 404);
        assert_eq!(missing.error_code(), Some(ErrorCode::ResourceNotFound));

        let upstream = h.send(Method::POST, "/api/upstream", Some(SESSION), "{}").await;
        assert_eq!(upstream.status().as_u16(), 502);
        assert_eq!(upstream.error_code(), Some(ErrorCode::UpstreamFailure));

        h.flush().await;
        assert!(h.audit_store.errors.lock().unwrap().is_empty());
        let logs = h.audit_store.api_logs.lock().unwrap();
        assert_eq!(logs[0].request_body, None, "GET bodies are never logged");
    }

    #[tokio::test]
    async fn counter_store_outage_fails_closed() {
        let mut h = Harness::with_counter_store(generous_limits(), Some(Arc::new(FailingCounters)));
        let response = h.send(Method::POST, "/api/echo", Some(SESSION), r#"{"name":"a"}"#).await;

        assert_eq!(response.status().as_u16(), 503);
        assert_eq!(response.error_code(), Some(ErrorCode::RateLimiterUnavailable));
        assert!(response.json().unwrap()["error"]["details"]["resetAt"].is_string());

        h.flush().await;
        assert!(!h.event_sink.types().contains(&"api.request".to_string()));
    }

    #[tokio::test]
    async fn audit_store_failure_does_not_change_the_response() {
        let audit_store = Arc::new(RecordingAuditStore {
            fail: true,
            ..Default::default()
        });
        let mut h = Harness::new(generous_limits());
        let config = AuditConfig {
            backend: SinkBackend::Log,
            log_request_bodies: false,
            queue_capacity: 10,
            event_backend: SinkBackend::Log,
            event_queue_capacity: 10,
        };
        let (failing_audit, worker) = AuditLogger::start(audit_store, &config);
        h.gateway.audit = failing_audit.clone();

        let response = h.send(Method::POST, "/api/echo", Some(SESSION), r#"{"name":"a"}"#).await;
        assert_eq!(response.status().as_u16(), 200);

        failing_audit.shutdown();
        worker.await.unwrap();
        h.flush().await;
    }
}
