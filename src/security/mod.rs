pub mod api_key_hashing;

pub use api_key_hashing::{mask_api_key, token_fingerprint, ApiKeyHasher};
