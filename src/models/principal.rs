use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Session,
    ApiKey,
}

/// Identity information for API key-authenticated requests.
/// Used for rate limiting and audit logging.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyIdentity {
    pub api_key_id: Uuid,
    pub label: Option<String>,
    /// Masked form of the raw key, safe for logs.
    pub masked_key: String,
    /// Per-key request ceiling, overrides the platform default.
    pub rate_limit: Option<u64>,
}

/// Resolved identity for one request. Never persisted by the gateway.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: Option<String>,
    pub auth_method: AuthMethod,
    pub api_key: Option<ApiKeyIdentity>,
}

impl Principal {
    pub fn from_session(user_id: Uuid, email: Option<String>, role: Option<String>) -> Self {
        Self {
            user_id,
            email,
            role,
            auth_method: AuthMethod::Session,
            api_key: None,
        }
    }

    pub fn from_api_key(user_id: Uuid, role: Option<String>, api_key: ApiKeyIdentity) -> Self {
        Self {
            user_id,
            email: None,
            role,
            auth_method: AuthMethod::ApiKey,
            api_key: Some(api_key),
        }
    }

    pub fn api_key_id(&self) -> Option<Uuid> {
        self.api_key.as_ref().map(|k| k.api_key_id)
    }
}
