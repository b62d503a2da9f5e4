pub mod audit;
pub mod principal;

pub use audit::{ApiLogEntry, ErrorRecord, OperationalEvent};
pub use principal::{ApiKeyIdentity, AuthMethod, Principal};
