use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::db::repositories::SystemEventRepository;
use crate::error::AppError;
use crate::models::OperationalEvent;
use crate::services::background_queue::{BackgroundQueue, QueueConsumer};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Request,
    RateLimited,
    AuthFailed,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Request => "api.request",
            EventType::RateLimited => "api.rate_limited",
            EventType::AuthFailed => "api.auth_failed",
            EventType::Error => "api.error",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn write(&self, event: &OperationalEvent) -> Result<(), AppError>;
}

pub struct PostgresEventSink {
    repository: SystemEventRepository,
}

impl PostgresEventSink {
    pub fn new(repository: SystemEventRepository) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl EventSink for PostgresEventSink {
    async fn write(&self, event: &OperationalEvent) -> Result<(), AppError> {
        self.repository.insert(event).await
    }
}

pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn write(&self, event: &OperationalEvent) -> Result<(), AppError> {
        log::info!(target: "events", "{} {}", event.event_type, event.payload);
        Ok(())
    }
}

struct EventSinkConsumer {
    sink: Arc<dyn EventSink>,
}

#[async_trait]
impl QueueConsumer<OperationalEvent> for EventSinkConsumer {
    async fn consume(&self, event: OperationalEvent) -> Result<(), AppError> {
        // Telemetry failures are not worth a warning.
        if let Err(e) = self.sink.write(&event).await {
            debug!("Dropping event {}: {}", event.event_type, e);
        }
        Ok(())
    }
}

/// Fire-and-forget telemetry.
#[derive(Clone)]
pub struct EventRecorder {
    queue: BackgroundQueue<OperationalEvent>,
    source: String,
}

impl EventRecorder {
    pub fn start(sink: Arc<dyn EventSink>, source: impl Into<String>, capacity: usize) -> (Self, JoinHandle<()>) {
        let queue = BackgroundQueue::new("events", capacity);
        let worker = queue.start(Arc::new(EventSinkConsumer { sink }));
        (
            Self {
                queue,
                source: source.into(),
            },
            worker,
        )
    }

    pub fn record(&self, event_type: EventType, payload: Value) {
        self.queue.push(OperationalEvent {
            event_type: event_type.as_str().to_string(),
            source: self.source.clone(),
            payload,
            created_at: Utc::now(),
        });
    }

    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}
