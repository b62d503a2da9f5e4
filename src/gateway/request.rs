use actix_web::http::Method;
use actix_web::http::header::{self, HeaderMap};
use bytes::Bytes;
use std::net::SocketAddr;

/// Path prefix used by the original serverless deployment.
pub const LEGACY_PATH_PREFIX: &str = "/.netlify/functions/api/";

/// Why a request body could not be handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyError {
    /// The body is larger than `limit` bytes and was not read.
    TooLarge { limit: usize },
    /// The connection failed while the body was being read.
    Incomplete(String),
}

/// Server-independent view of an incoming request.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub body_error: Option<BodyError>,
    pub peer_addr: Option<SocketAddr>,
}

impl GatewayRequest {
    pub fn new(
        method: Method,
        path: impl Into<String>,
        headers: HeaderMap,
        body: Bytes,
        peer_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            headers,
            body,
            body_error: None,
            peer_addr,
        }
    }

    pub fn with_body_error(mut self, error: BodyError) -> Self {
        self.body = Bytes::new();
        self.body_error = Some(error);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn authorization(&self) -> Option<&str> {
        self.headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok())
    }

    /// Address the request is attributed to.
    ///
    /// Forwarding headers are only believed when `trusted_proxy_hops` proxies
    /// sit in front of the gateway. Each of them appends one `X-Forwarded-For`
    /// entry, so the client is the N-th entry from the right. Anything further
    /// left was written by the client and is ignored. `X-Real-IP` is the
    /// fallback behind a proxy, the socket peer otherwise.
    pub fn client_ip(&self, trusted_proxy_hops: usize) -> String {
        if trusted_proxy_hops > 0 {
            if let Some(forwarded_for) = self.header("x-forwarded-for") {
                let hops: Vec<&str> = forwarded_for.split(',').map(str::trim).filter(|ip| !ip.is_empty()).collect();
                if let Some(client) = hops.get(hops.len().saturating_sub(trusted_proxy_hops)) {
                    return client.to_string();
                }
            }

            if let Some(real_ip) = self.header("x-real-ip").map(str::trim).filter(|ip| !ip.is_empty()) {
                return real_ip.to_string();
            }
        }

        match self.peer_addr {
            Some(peer_addr) => peer_addr.ip().to_string(),
            None => "unknown".to_string(),
        }
    }

    pub fn user_agent(&self) -> String {
        self.headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .filter(|ua| !ua.trim().is_empty())
            .unwrap_or("unknown")
            .to_string()
    }
}

/// Strips the API prefix (configured or legacy) and surrounding slashes.
pub fn normalize_path(path: &str, prefix: &str) -> String {
    let path = path.split('?').next().unwrap_or_default();
    let stripped = [prefix, LEGACY_PATH_PREFIX]
        .iter()
        .filter(|p| !p.is_empty())
        .find_map(|p| {
            path.strip_prefix(*p)
                .or_else(|| (path == p.trim_end_matches('/')).then_some(""))
        })
        .unwrap_or(path);
    stripped.trim_matches('/').to_string()
}
