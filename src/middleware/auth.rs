use chrono::Utc;
use log::{debug, warn};
use std::sync::Arc;

use crate::api_contract::ErrorCode;
use crate::db::repositories::ApiKeyStore;
use crate::models::{ApiKeyIdentity, Principal};
use crate::security::{ApiKeyHasher, mask_api_key};
use crate::services::auth::{SessionError, SessionVerifier};

/// Why a request could not be authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("Missing Authorization header")]
    MissingHeader,
    #[error("Malformed Authorization header")]
    MalformedHeader,
    #[error("Invalid or expired session")]
    InvalidSession,
    #[error("Invalid API key")]
    UnknownApiKey,
    #[error("API key has been revoked")]
    RevokedApiKey,
    #[error("API key has expired")]
    ExpiredApiKey,
    #[error("Authentication service is temporarily unavailable")]
    BackendUnavailable,
    #[error("Authentication is not configured")]
    Misconfigured,
}

impl AuthFailure {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AuthFailure::MissingHeader => ErrorCode::MissingAuthorization,
            AuthFailure::MalformedHeader => ErrorCode::MalformedAuthorization,
            AuthFailure::InvalidSession => ErrorCode::InvalidSession,
            AuthFailure::UnknownApiKey => ErrorCode::UnknownApiKey,
            AuthFailure::RevokedApiKey => ErrorCode::RevokedApiKey,
            AuthFailure::ExpiredApiKey => ErrorCode::ExpiredApiKey,
            AuthFailure::BackendUnavailable => ErrorCode::AuthBackendUnavailable,
            AuthFailure::Misconfigured => ErrorCode::Misconfigured,
        }
    }
}

/// Credential extracted from the `Authorization` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential<'a> {
    Session(&'a str),
    ApiKey(&'a str),
}

/// Accepts `Bearer <session>`, `Bearer <prefix>...` and `ApiKey <key>`.
pub fn parse_authorization<'a>(header: Option<&'a str>, api_key_prefix: &str) -> Result<Credential<'a>, AuthFailure> {
    let header = header.map(str::trim).filter(|h| !h.is_empty()).ok_or(AuthFailure::MissingHeader)?;

    let (scheme, value) = header.split_once(char::is_whitespace).ok_or(AuthFailure::MalformedHeader)?;
    let value = value.trim();
    if value.is_empty() || value.contains(char::is_whitespace) {
        return Err(AuthFailure::MalformedHeader);
    }

    if scheme.eq_ignore_ascii_case("bearer") {
        if !api_key_prefix.is_empty() && value.starts_with(api_key_prefix) {
            Ok(Credential::ApiKey(value))
        } else {
            Ok(Credential::Session(value))
        }
    } else if scheme.eq_ignore_ascii_case("apikey") {
        Ok(Credential::ApiKey(value))
    } else {
        Err(AuthFailure::MalformedHeader)
    }
}

/// Resolves a request's credential into a [`Principal`].
pub struct AuthValidator {
    sessions: Option<Arc<dyn SessionVerifier>>,
    api_keys: Arc<dyn ApiKeyStore>,
    hasher: ApiKeyHasher,
    api_key_prefix: String,
}

impl AuthValidator {
    pub fn new(
        sessions: Option<Arc<dyn SessionVerifier>>,
        api_keys: Arc<dyn ApiKeyStore>,
        hasher: ApiKeyHasher,
        api_key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            api_keys,
            hasher,
            api_key_prefix: api_key_prefix.into(),
        }
    }

    /// Masked form of the API key in the header, if the header carries one.
    pub fn masked_key_from_header(&self, header: Option<&str>) -> Option<String> {
        match parse_authorization(header, &self.api_key_prefix) {
            Ok(Credential::ApiKey(raw)) => Some(mask_api_key(raw)),
            _ => None,
        }
    }

    pub async fn authenticate(&self, header: Option<&str>) -> Result<Principal, AuthFailure> {
        match parse_authorization(header, &self.api_key_prefix)? {
            Credential::Session(token) => self.authenticate_session(token).await,
            Credential::ApiKey(raw) => self.authenticate_api_key(raw).await,
        }
    }

    async fn authenticate_session(&self, token: &str) -> Result<Principal, AuthFailure> {
        let verifier = self.sessions.as_ref().ok_or_else(|| {
            warn!("Session token presented but no session verifier is configured");
            AuthFailure::Misconfigured
        })?;

        match verifier.verify(token).await {
            Ok(session) => Ok(Principal::from_session(session.user_id, session.email, session.role)),
            Err(SessionError::Invalid) => Err(AuthFailure::InvalidSession),
            Err(SessionError::Unavailable(reason)) => {
                warn!("Session verification unavailable: {}", reason);
                Err(AuthFailure::BackendUnavailable)
            }
        }
    }

    async fn authenticate_api_key(&self, raw: &str) -> Result<Principal, AuthFailure> {
        let masked = mask_api_key(raw);
        let key_hash = self.hasher.hash(raw).map_err(|e| {
            warn!("API key hashing failed: {}", e);
            AuthFailure::Misconfigured
        })?;

        let record = self
            .api_keys
            .find_by_hash(&key_hash)
            .await
            .map_err(|e| {
                warn!("API key lookup failed: {}", e);
                AuthFailure::BackendUnavailable
            })?
            .ok_or_else(|| {
                debug!("Unknown API key {}", masked);
                AuthFailure::UnknownApiKey
            })?;

        if !record.active {
            debug!("Revoked API key {} presented", masked);
            return Err(AuthFailure::RevokedApiKey);
        }
        let now = Utc::now();
        if record.is_expired(now) {
            debug!("Expired API key {} presented", masked);
            return Err(AuthFailure::ExpiredApiKey);
        }

        let store = self.api_keys.clone();
        let key_id = record.id;
        tokio::spawn(async move {
            if let Err(e) = store.touch_last_used(&key_id, now).await {
                warn!("Failed to update last_used_at for API key {}: {}", key_id, e);
            }
        });

        Ok(Principal::from_api_key(
            record.user_id,
            record.scope.clone(),
            ApiKeyIdentity {
                api_key_id: record.id,
                label: record.label.clone(),
                masked_key: masked,
                rate_limit: record.configured_rate_limit(),
            },
        ))
    }
}
