use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use log::{debug, error, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::security::token_fingerprint;
use crate::utils::TtlCache;

/// Identity returned by the identity service for a valid session token.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedSession {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid or expired session token")]
    Invalid,
    #[error("Identity service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SessionVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedSession, SessionError>;
}

#[derive(Debug, Deserialize)]
struct IdentityUser {
    id: String,
    email: Option<String>,
    role: Option<String>,
}

/// Asks the hosted identity service (`GET /auth/v1/user`) who owns a token.
pub struct RemoteSessionVerifier {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl RemoteSessionVerifier {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        })
    }
}

#[async_trait]
impl SessionVerifier for RemoteSessionVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedSession, SessionError> {
        debug!("Verifying session token with identity service");

        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                error!("Identity service request failed: {}", e);
                SessionError::Unavailable(e.to_string())
            })?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            error!("Identity service error: HTTP {}", status);
            return Err(SessionError::Unavailable(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            debug!("Identity service rejected token: HTTP {}", status);
            return Err(SessionError::Invalid);
        }

        let user: IdentityUser = response.json().await.map_err(|e| {
            warn!("Unreadable identity service response: {}", e);
            SessionError::Unavailable(format!("Failed to parse identity response: {}", e))
        })?;

        let user_id = Uuid::parse_str(&user.id).map_err(|_| SessionError::Invalid)?;
        Ok(VerifiedSession {
            user_id,
            email: user.email,
            role: user.role,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SessionClaims {
    sub: String,
    email: Option<String>,
    role: Option<String>,
}

/// Verifies HS256 session tokens locally with the shared signing secret.
pub struct JwtSessionVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtSessionVerifier {
    pub fn new(secret: &str, audience: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);
        validation.leeway = 30;
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl SessionVerifier for JwtSessionVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedSession, SessionError> {
        let data = decode::<SessionClaims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            debug!("Session token rejected: {}", e);
            SessionError::Invalid
        })?;

        let user_id = Uuid::parse_str(&data.claims.sub).map_err(|_| SessionError::Invalid)?;
        Ok(VerifiedSession {
            user_id,
            email: data.claims.email,
            role: data.claims.role,
        })
    }
}

/// Keeps successful verifications for a short time, keyed by token digest.
/// Failures are never cached.
pub struct CachedSessionVerifier {
    inner: Arc<dyn SessionVerifier>,
    cache: TtlCache<VerifiedSession>,
}

impl CachedSessionVerifier {
    pub fn new(inner: Arc<dyn SessionVerifier>, ttl: Duration, capacity: usize) -> Self {
        Self {
            inner,
            cache: TtlCache::new(ttl, capacity),
        }
    }

    pub fn evict_expired(&self) -> usize {
        self.cache.evict_expired()
    }

    /// Periodically drops expired sessions so idle tokens do not linger.
    pub fn spawn_cleanup_task(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let evicted = self.evict_expired();
                if evicted > 0 {
                    debug!("Evicted {} expired cached sessions", evicted);
                }
            }
        })
    }
}

#[async_trait]
impl SessionVerifier for CachedSessionVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedSession, SessionError> {
        let key = token_fingerprint(token);
        if let Some(session) = self.cache.get(&key) {
            return Ok(session);
        }

        let session = self.inner.verify(token).await?;
        self.cache.insert(key, session.clone());
        Ok(session)
    }
}
