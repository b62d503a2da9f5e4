use std::env;
use std::str::FromStr;

use crate::error::AppError;
use serde::{Deserialize, Serialize};

/// Routes served by the business backend in the original deployment.
pub const DEFAULT_UPSTREAM_ROUTES: [&str; 12] = [
    "fnol/create",
    "deadlines/check",
    "compliance/analyze",
    "alerts/list",
    "alerts/resolve",
    "evidence/upload",
    "estimate/interpret",
    "settlement/calc",
    "policy/compare",
    "history/query",
    "expert/find",
    "checklist/generate",
];

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppSettings {
    pub app: AppConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub audit: AuditConfig,
    pub upstream: Option<UpstreamConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub environment: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub path_prefix: String,
    pub max_body_bytes: usize,
    /// Reverse proxies in front of the gateway. 0 means clients connect directly.
    pub trusted_proxy_hops: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SessionVerifierConfig {
    /// Ask the identity service who owns the token.
    Remote { url: String, anon_key: String },
    /// Verify HS256 session tokens locally.
    Jwt { secret: String, audience: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    pub session_verifier: SessionVerifierConfig,
    pub session_cache_ttl_secs: u64,
    pub session_cache_capacity: usize,
    pub api_key_prefix: String,
    pub api_key_hash_secret: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimit {
    pub max_requests: u64,
    pub window_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterBackend {
    Redis { url: String },
    Memory { capacity: usize },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub backend: CounterBackend,
    pub key_prefix: String,
    pub per_user: TierLimit,
    pub per_api_key: TierLimit,
    pub per_origin: TierLimit,
    pub burst: TierLimit,
    /// Penalty applied to a subject after a violation. 0 disables it.
    pub violation_block_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: CounterBackend::Memory { capacity: 100_000 },
            key_prefix: "default".to_string(),
            per_user: TierLimit { max_requests: 600, window_secs: 60 },
            per_api_key: TierLimit { max_requests: 120, window_secs: 60 },
            per_origin: TierLimit { max_requests: 300, window_secs: 60 },
            burst: TierLimit { max_requests: 50, window_secs: 10 },
            violation_block_secs: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SinkBackend {
    Postgres,
    Log,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditConfig {
    pub backend: SinkBackend,
    pub log_request_bodies: bool,
    pub queue_capacity: usize,
    pub event_backend: SinkBackend,
    pub event_queue_capacity: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub routes: Vec<String>,
    pub timeout_secs: u64,
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T, AppError> {
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Configuration(format!("{} must be a valid number", name))),
        _ => Ok(default),
    }
}

fn require_var(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String, AppError> {
    lookup(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::Configuration(format!("{} must be set", name)))
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> Result<bool, AppError> {
    match lookup(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(_) => Err(AppError::Configuration(format!("{} must be true or false", name))),
    }
}

fn parse_sink(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<SinkBackend, AppError> {
    match lookup(name).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("postgres") => Ok(SinkBackend::Postgres),
        Some("log") => Ok(SinkBackend::Log),
        Some(other) => Err(AppError::Configuration(format!(
            "{} must be 'postgres' or 'log', got '{}'",
            name, other
        ))),
    }
}

fn parse_tier(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: TierLimit,
) -> Result<TierLimit, AppError> {
    let max_requests = parse_var(lookup, &format!("RATE_LIMIT_{}_MAX", name), default.max_requests)?;
    let window_secs = parse_var(lookup, &format!("RATE_LIMIT_{}_WINDOW_SECS", name), default.window_secs)?;
    if max_requests == 0 || window_secs == 0 {
        return Err(AppError::Configuration(format!(
            "RATE_LIMIT_{}_MAX and RATE_LIMIT_{}_WINDOW_SECS must be greater than zero",
            name, name
        )));
    }
    Ok(TierLimit { max_requests, window_secs })
}

impl AppSettings {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_source(|name| env::var(name).ok())
    }

    /// Build settings from an arbitrary variable source.
    pub fn from_source(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        // App config
        let app_name = lookup("APP_NAME").unwrap_or_else(|| "cn-gateway".to_string());
        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        // Server config
        let server_host = lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let server_port = lookup("SERVER_PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse::<u16>()
            .map_err(|_| AppError::Configuration("SERVER_PORT must be a valid port number".to_string()))?;
        let path_prefix = lookup("GATEWAY_PATH_PREFIX").unwrap_or_else(|| "/api/".to_string());
        let max_body_bytes = parse_var(&lookup, "MAX_BODY_BYTES", 1_048_576usize)?;
        let trusted_proxy_hops = parse_var(&lookup, "TRUSTED_PROXY_HOPS", 0usize)?;

        // Auth config
        let verifier_kind = lookup("SESSION_VERIFIER")
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "remote".to_string());
        let session_verifier = match verifier_kind.as_str() {
            "remote" => SessionVerifierConfig::Remote {
                url: require_var(&lookup, "SUPABASE_URL")?.trim_end_matches('/').to_string(),
                anon_key: require_var(&lookup, "SUPABASE_ANON_KEY")?,
            },
            "jwt" => SessionVerifierConfig::Jwt {
                secret: require_var(&lookup, "SESSION_JWT_SECRET")?,
                audience: lookup("SESSION_JWT_AUDIENCE").unwrap_or_else(|| "authenticated".to_string()),
            },
            other => {
                return Err(AppError::Configuration(format!(
                    "SESSION_VERIFIER must be 'remote' or 'jwt', got '{}'",
                    other
                )));
            }
        };
        let session_cache_ttl_secs = parse_var(&lookup, "SESSION_CACHE_TTL_SECS", 30u64)?;
        let session_cache_capacity = parse_var(&lookup, "SESSION_CACHE_CAPACITY", 10_000usize)?;
        let api_key_prefix = lookup("API_KEY_PREFIX").unwrap_or_else(|| "cn_".to_string());
        let api_key_hash_secret = require_var(&lookup, "API_KEY_HASH_SECRET")?;

        // Rate limiting
        let defaults = RateLimitConfig::default();
        let backend = match lookup("RATE_LIMIT_BACKEND")
            .map(|v| v.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("") | Some("redis") => CounterBackend::Redis {
                url: require_var(&lookup, "REDIS_URL")?,
            },
            Some("memory") if environment.trim().eq_ignore_ascii_case("production") => {
                return Err(AppError::Configuration(
                    "RATE_LIMIT_BACKEND=memory is not allowed when ENVIRONMENT=production".to_string(),
                ));
            }
            Some("memory") => CounterBackend::Memory {
                capacity: parse_var(&lookup, "RATE_LIMIT_MEMORY_CAPACITY", 100_000usize)?,
            },
            Some(other) => {
                return Err(AppError::Configuration(format!(
                    "RATE_LIMIT_BACKEND must be 'redis' or 'memory', got '{}'",
                    other
                )));
            }
        };
        let rate_limit = RateLimitConfig {
            backend,
            key_prefix: lookup("RATE_LIMIT_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            per_user: parse_tier(&lookup, "USER", defaults.per_user)?,
            per_api_key: parse_tier(&lookup, "API_KEY", defaults.per_api_key)?,
            per_origin: parse_tier(&lookup, "ORIGIN", defaults.per_origin)?,
            burst: parse_tier(&lookup, "BURST", defaults.burst)?,
            violation_block_secs: parse_var(&lookup, "RATE_LIMIT_VIOLATION_BLOCK_SECS", 0u64)?,
        };

        // Audit and events
        let audit = AuditConfig {
            backend: parse_sink(&lookup, "AUDIT_BACKEND")?,
            log_request_bodies: parse_bool(&lookup, "AUDIT_LOG_REQUEST_BODIES", false)?,
            queue_capacity: parse_var(&lookup, "AUDIT_QUEUE_CAPACITY", 10_000usize)?,
            event_backend: parse_sink(&lookup, "EVENT_BACKEND")?,
            event_queue_capacity: parse_var(&lookup, "EVENT_QUEUE_CAPACITY", 10_000usize)?,
        };

        // Database (API keys always live in Postgres)
        let database = DatabaseConfig {
            url: require_var(&lookup, "DATABASE_URL")?,
            max_connections: parse_var(&lookup, "DATABASE_MAX_CONNECTIONS", 10u32)?,
        };

        // Upstream business backend
        let upstream = match lookup("UPSTREAM_BASE_URL").filter(|v| !v.trim().is_empty()) {
            Some(base_url) => {
                let routes = match lookup("UPSTREAM_ROUTES").filter(|v| !v.trim().is_empty()) {
                    Some(list) => list
                        .split(',')
                        .map(|s| s.trim().trim_matches('/').to_string())
                        .filter(|s| !s.is_empty())
                        .collect(),
                    None => DEFAULT_UPSTREAM_ROUTES.iter().map(|s| s.to_string()).collect(),
                };
                Some(UpstreamConfig {
                    base_url: base_url.trim_end_matches('/').to_string(),
                    routes,
                    timeout_secs: parse_var(&lookup, "UPSTREAM_TIMEOUT_SECS", 30u64)?,
                })
            }
            None => None,
        };

        Ok(Self {
            app: AppConfig {
                name: app_name,
                environment,
            },
            server: ServerConfig {
                host: server_host,
                port: server_port,
                path_prefix,
                max_body_bytes,
                trusted_proxy_hops,
            },
            database,
            auth: AuthConfig {
                session_verifier,
                session_cache_ttl_secs,
                session_cache_capacity,
                api_key_prefix,
                api_key_hash_secret,
            },
            rate_limit,
            audit,
            upstream,
        })
    }
}
