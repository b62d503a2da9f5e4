use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::utils::PoisonedLockRecovery;

/// Destination for the items of a [`BackgroundQueue`].
#[async_trait]
pub trait QueueConsumer<T: Send + 'static>: Send + Sync {
    async fn consume(&self, item: T) -> Result<(), AppError>;
}

struct QueueInner<T> {
    name: &'static str,
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    notify: Notify,
    dropped: AtomicU64,
    shutdown: CancellationToken,
}

/// Bounded, drop-oldest, at-most-once queue drained by a single worker task.
///
/// `push` never waits, so callers on the response path pay only for a
/// mutex-guarded `VecDeque` insert.
pub struct BackgroundQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for BackgroundQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> BackgroundQueue<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name,
                capacity: capacity.max(1),
                items: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                dropped: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Enqueues an item. When full, the oldest pending item is discarded.
    pub fn push(&self, item: T) {
        if self.inner.shutdown.is_cancelled() {
            debug!("{} queue is shut down, discarding item", self.inner.name);
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        {
            let mut items = self.inner.items.lock().recover_poisoned_lock(self.inner.name);
            if items.len() >= self.inner.capacity {
                items.pop_front();
                let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!("{} queue full, {} items dropped so far", self.inner.name, dropped);
                }
            }
            items.push_back(item);
        }

        self.inner.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.inner.items.lock().recover_poisoned_lock(self.inner.name).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items lost to overflow or pushed after shutdown.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Asks the worker to drain what is pending and stop.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    fn pop(&self) -> Option<T> {
        self.inner.items.lock().recover_poisoned_lock(self.inner.name).pop_front()
    }

    /// Spawns the worker that feeds queued items to `consumer`.
    pub fn start(&self, consumer: Arc<dyn QueueConsumer<T>>) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            info!("{} queue worker started", queue.inner.name);
            loop {
                match queue.pop() {
                    Some(item) => {
                        if let Err(e) = consumer.consume(item).await {
                            warn!("{} queue failed to deliver item: {}", queue.inner.name, e);
                        }
                    }
                    None => {
                        if queue.inner.shutdown.is_cancelled() {
                            break;
                        }
                        tokio::select! {
                            _ = queue.inner.notify.notified() => {}
                            _ = queue.inner.shutdown.cancelled() => {}
                        }
                    }
                }
            }
            info!(
                "{} queue worker stopped ({} items dropped)",
                queue.inner.name,
                queue.dropped_count()
            );
        })
    }
}
