pub mod error_handling;
pub mod ttl_cache;

pub use error_handling::PoisonedLockRecovery;
pub use ttl_cache::TtlCache;
