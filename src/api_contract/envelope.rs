use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use super::error_codes::ErrorCode;

pub const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Headers", "Content-Type, Authorization"),
    ("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS"),
];

/// Body sent when even the error envelope cannot be built.
pub const CRITICAL_BODY: &str = r#"{"success":false,"data":null,"error":{"code":"CN-9000","message":"Critical failure while building the response"}}"#;

#[derive(Serialize)]
struct SuccessEnvelope<'a, T: Serialize> {
    success: bool,
    data: &'a T,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    success: bool,
    data: Option<Value>,
    error: ErrorPayload<'a>,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    code: ErrorCode,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a Value>,
}

/// A fully built gateway response, independent of the HTTP server in front of it.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: Bytes,
    error_code: Option<ErrorCode>,
    error_message: Option<String>,
}

impl GatewayResponse {
    fn new(status: StatusCode, body: Bytes) -> Self {
        let mut headers: Vec<(String, String)> = CORS_HEADERS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if !body.is_empty() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        Self {
            status,
            headers,
            body,
            error_code: None,
            error_message: None,
        }
    }

    /// `{ "success": true, "data": ... }`
    pub fn success<T: Serialize>(data: &T) -> Self {
        Self::success_with_status(StatusCode::OK, data)
    }

    pub fn success_with_status<T: Serialize>(status: StatusCode, data: &T) -> Self {
        let envelope = SuccessEnvelope { success: true, data };
        match serde_json::to_vec(&envelope) {
            Ok(body) => Self::new(status, Bytes::from(body)),
            Err(e) => {
                log::error!("Failed to serialize success envelope: {}", e);
                Self::critical()
            }
        }
    }

    /// `{ "success": false, "data": null, "error": { code, message, details? } }`
    pub fn error(code: ErrorCode, message: impl Into<String>, details: Option<Value>) -> Self {
        let message = message.into();
        let envelope = ErrorEnvelope {
            success: false,
            data: None,
            error: ErrorPayload {
                code,
                message: &message,
                details: details.as_ref(),
            },
        };
        match serde_json::to_vec(&envelope) {
            Ok(body) => {
                let mut response = Self::new(code.http_status(), Bytes::from(body));
                response.error_code = Some(code);
                response.error_message = Some(message);
                response
            }
            Err(e) => {
                log::error!("Failed to serialize error envelope for {}: {}", code, e);
                Self::critical()
            }
        }
    }

    pub fn critical() -> Self {
        let mut response = Self::new(StatusCode::INTERNAL_SERVER_ERROR, Bytes::from_static(CRITICAL_BODY.as_bytes()));
        response.error_code = Some(ErrorCode::Critical);
        response.error_message = Some("Critical failure while building the response".to_string());
        response
    }

    /// CORS preflight answer. Empty body, permissive headers.
    pub fn preflight() -> Self {
        Self::new(StatusCode::OK, Bytes::new())
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error_code
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Parsed body, if it is JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn into_http_response(self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status);
        for (name, value) in &self.headers {
            builder.insert_header((name.as_str(), value.as_str()));
        }
        builder.body(self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn success_shape_has_no_error_key() {
        let response = GatewayResponse::success(&json!({ "id": 7 }));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.json().unwrap(), json!({ "success": true, "data": { "id": 7 } }));
        assert!(response.error_code().is_none());
    }

    #[test]
    fn error_shape_includes_details_only_when_present() {
        let without = GatewayResponse::error(ErrorCode::EndpointNotFound, "Endpoint not found: nope", None);
        assert_eq!(
            without.json().unwrap(),
            json!({
                "success": false,
                "data": null,
                "error": { "code": "CN-7000", "message": "Endpoint not found: nope" }
            })
        );
        assert_eq!(without.status(), StatusCode::NOT_FOUND);

        let with = GatewayResponse::error(
            ErrorCode::RateLimitExceeded,
            "Rate limit exceeded",
            Some(json!({ "remaining": 0, "resetAt": "2026-01-01T00:00:00.000Z" })),
        );
        assert_eq!(with.json().unwrap()["error"]["details"]["remaining"], json!(0));
        assert_eq!(with.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn critical_body_is_valid_envelope() {
        let response = GatewayResponse::critical();
        let body = response.json().unwrap();
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["data"], Value::Null);
        assert_eq!(body["error"]["code"], json!("CN-9000"));
    }

    #[test]
    fn every_response_carries_cors_headers() {
        for response in [
            GatewayResponse::preflight(),
            GatewayResponse::success(&json!({})),
            GatewayResponse::error(ErrorCode::Internal, "Internal server error", None),
        ] {
            assert_eq!(response.header("access-control-allow-origin"), Some("*"));
            assert_eq!(
                response.header("Access-Control-Allow-Methods"),
                Some("GET, POST, PUT, DELETE, OPTIONS")
            );
        }
    }

    #[test]
    fn with_header_replaces_existing_value() {
        let response = GatewayResponse::preflight()
            .with_header("X-Request-Id", "a")
            .with_header("x-request-id", "b");
        assert_eq!(response.header("X-Request-Id"), Some("b"));
    }
}
