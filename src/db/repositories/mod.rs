pub mod api_key_repository;
pub mod api_log_repository;
pub mod system_error_repository;
pub mod system_event_repository;

pub use api_key_repository::{ApiKey, ApiKeyRepository, ApiKeyStore};
pub use api_log_repository::ApiLogRepository;
pub use system_error_repository::SystemErrorRepository;
pub use system_event_repository::SystemEventRepository;
