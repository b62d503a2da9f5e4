pub mod auth;
pub mod rate_limit_storage;
pub mod rate_limiting;

pub use auth::{AuthFailure, AuthValidator, Credential, parse_authorization};
pub use rate_limit_storage::{
    CounterStore, MemoryCounterStore, RedisCounterStore, start_memory_store_cleanup_task,
};
pub use rate_limiting::{AdmissionController, AdmissionDecision, Rejection, RejectionReason, Tier, TierStatus};
