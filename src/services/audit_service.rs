use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::settings::AuditConfig;
use crate::db::repositories::{ApiLogRepository, SystemErrorRepository};
use crate::error::AppError;
use crate::models::{ApiLogEntry, ErrorRecord};
use crate::services::background_queue::{BackgroundQueue, QueueConsumer};

/// Persistence target for request logs and error records.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn write_api_log(&self, entry: &ApiLogEntry) -> Result<(), AppError>;
    async fn write_error(&self, record: &ErrorRecord) -> Result<(), AppError>;
}

pub struct PostgresAuditStore {
    api_logs: ApiLogRepository,
    system_errors: SystemErrorRepository,
}

impl PostgresAuditStore {
    pub fn new(api_logs: ApiLogRepository, system_errors: SystemErrorRepository) -> Self {
        Self { api_logs, system_errors }
    }
}

#[async_trait]
impl AuditStore for PostgresAuditStore {
    async fn write_api_log(&self, entry: &ApiLogEntry) -> Result<(), AppError> {
        self.api_logs.insert(entry).await
    }

    async fn write_error(&self, record: &ErrorRecord) -> Result<(), AppError> {
        self.system_errors.insert(record).await
    }
}

/// Writes audit records as structured lines on the `audit` log target.
pub struct LogAuditStore;

#[async_trait]
impl AuditStore for LogAuditStore {
    async fn write_api_log(&self, entry: &ApiLogEntry) -> Result<(), AppError> {
        info!(target: "audit", "api_log {}", serde_json::to_string(entry)?);
        Ok(())
    }

    async fn write_error(&self, record: &ErrorRecord) -> Result<(), AppError> {
        info!(target: "audit", "system_error {}", serde_json::to_string(record)?);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum AuditJob {
    Request(Box<ApiLogEntry>),
    Error(Box<ErrorRecord>),
}

struct AuditStoreConsumer {
    store: Arc<dyn AuditStore>,
}

#[async_trait]
impl QueueConsumer<AuditJob> for AuditStoreConsumer {
    async fn consume(&self, job: AuditJob) -> Result<(), AppError> {
        match job {
            AuditJob::Request(entry) => self.store.write_api_log(&entry).await,
            AuditJob::Error(record) => self.store.write_error(&record).await,
        }
    }
}

/// Best-effort audit trail. Recording only enqueues; the write happens on the
/// queue worker and its failure is logged and dropped.
#[derive(Clone)]
pub struct AuditLogger {
    queue: BackgroundQueue<AuditJob>,
    log_request_bodies: bool,
}

impl AuditLogger {
    pub fn start(store: Arc<dyn AuditStore>, config: &AuditConfig) -> (Self, JoinHandle<()>) {
        let queue = BackgroundQueue::new("audit", config.queue_capacity);
        let worker = queue.start(Arc::new(AuditStoreConsumer { store }));
        let logger = Self {
            queue,
            log_request_bodies: config.log_request_bodies,
        };
        (logger, worker)
    }

    pub fn record_request(&self, entry: ApiLogEntry) {
        debug!(
            "Audit {} {} -> {} ({}ms)",
            entry.method, entry.endpoint, entry.status_code, entry.response_time_ms
        );
        self.queue.push(AuditJob::Request(Box::new(entry)));
    }

    pub fn record_error(&self, record: ErrorRecord) {
        self.queue.push(AuditJob::Error(Box::new(record)));
    }

    /// Bodies are only kept when enabled, and never for GET.
    pub fn should_log_body(&self, method: &str) -> bool {
        self.log_request_bodies && !method.eq_ignore_ascii_case("GET")
    }

    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped_count()
    }

    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// In-memory store that keeps everything it is given.
    #[derive(Default)]
    pub struct RecordingAuditStore {
        pub api_logs: Mutex<Vec<ApiLogEntry>>,
        pub errors: Mutex<Vec<ErrorRecord>>,
        pub fail: bool,
    }

    #[async_trait]
    impl AuditStore for RecordingAuditStore {
        async fn write_api_log(&self, entry: &ApiLogEntry) -> Result<(), AppError> {
            if self.fail {
                return Err(AppError::Database("audit store offline".to_string()));
            }
            self.api_logs.lock().unwrap().push(entry.clone());
            Ok(())
        }

        async fn write_error(&self, record: &ErrorRecord) -> Result<(), AppError> {
            if self.fail {
                return Err(AppError::Database("audit store offline".to_string()));
            }
            self.errors.lock().unwrap().push(record.clone());
            Ok(())
        }
    }
}
