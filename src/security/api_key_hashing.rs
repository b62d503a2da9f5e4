use crate::error::AppError;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Hashes raw API keys with HMAC-SHA256 so only digests ever reach the key store.
#[derive(Clone)]
pub struct ApiKeyHasher {
    secret: Vec<u8>,
}

impl std::fmt::Debug for ApiKeyHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyHasher").finish_non_exhaustive()
    }
}

impl ApiKeyHasher {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }

    /// Hashes an API key using HMAC-SHA256
    ///
    /// # Returns
    /// * `Result<String, AppError>` - Hex-encoded hash or error
    pub fn hash(&self, raw_key: &str) -> Result<String, AppError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AppError::Internal(format!("Failed to create HMAC: {}", e)))?;

        mac.update(raw_key.as_bytes());

        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// First four characters followed by `***`.
pub fn mask_api_key(raw_key: &str) -> String {
    let visible: String = raw_key.chars().take(4).collect();
    format!("{}***", visible)
}

/// SHA-256 of a bearer token, used as a cache key so raw tokens are never held.
pub fn token_fingerprint(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
