pub mod audit_service;
pub mod auth;
pub mod background_queue;
pub mod event_recorder;

// Re-export commonly used types
pub use audit_service::{AuditLogger, AuditStore, LogAuditStore, PostgresAuditStore};
pub use background_queue::{BackgroundQueue, QueueConsumer};
pub use event_recorder::{EventRecorder, EventSink, EventType, LogEventSink, PostgresEventSink};
