use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, info};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::AppError;

/// One fixed-window counter to bump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSpec {
    pub key: String,
    pub window: Duration,
}

/// Counter value after the increment, and how long its window still runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterReading {
    pub count: u64,
    pub ttl: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementOutcome {
    /// Same order as the requested counters.
    pub counters: Vec<CounterReading>,
    /// Remaining block time per requested block key, `None` when not blocked.
    pub blocks: Vec<Option<Duration>>,
}

/// Shared store behind admission control.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increments every counter in one step. A missing counter starts at zero
    /// with a TTL of its window; an existing one keeps its TTL. Block keys are
    /// only read.
    async fn increment(&self, counters: &[CounterSpec], block_keys: &[String]) -> Result<IncrementOutcome, AppError>;

    async fn block(&self, block_key: &str, duration: Duration) -> Result<(), AppError>;
}

fn ttl_from_millis(pttl: i64, fallback: Duration) -> Duration {
    if pttl > 0 { Duration::from_millis(pttl as u64) } else { fallback }
}

/// Redis-backed counters, shared by every gateway process.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection_manager: redis::aio::ConnectionManager,
}

impl RedisCounterStore {
    pub async fn connect(redis_url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)?;
        let connection_manager = redis::aio::ConnectionManager::new(client).await?;
        info!("Redis connection established for rate limiting");
        Ok(Self { connection_manager })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, counters: &[CounterSpec], block_keys: &[String]) -> Result<IncrementOutcome, AppError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for counter in counters {
            pipe.cmd("SET")
                .arg(&counter.key)
                .arg(0)
                .arg("NX")
                .arg("PX")
                .arg(counter.window.as_millis() as u64)
                .ignore();
            pipe.cmd("INCR").arg(&counter.key);
            pipe.cmd("PTTL").arg(&counter.key);
        }
        for key in block_keys {
            pipe.cmd("PTTL").arg(key);
        }

        let mut conn = self.connection_manager.clone();
        let values: Vec<i64> = pipe.query_async(&mut conn).await?;

        if values.len() != counters.len() * 2 + block_keys.len() {
            return Err(AppError::Redis(format!(
                "Unexpected rate limit transaction result length {}",
                values.len()
            )));
        }

        let (counter_values, block_values) = values.split_at(counters.len() * 2);
        let counters = counters
            .iter()
            .zip(counter_values.chunks_exact(2))
            .map(|(spec, pair)| CounterReading {
                count: pair[0].max(0) as u64,
                ttl: ttl_from_millis(pair[1], spec.window),
            })
            .collect();
        let blocks = block_values
            .iter()
            .map(|pttl| (*pttl > 0).then(|| Duration::from_millis(*pttl as u64)))
            .collect();

        Ok(IncrementOutcome { counters, blocks })
    }

    async fn block(&self, block_key: &str, duration: Duration) -> Result<(), AppError> {
        let mut conn = self.connection_manager.clone();
        let _: () = redis::cmd("SET")
            .arg(block_key)
            .arg(1)
            .arg("PX")
            .arg(duration.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct MemoryCounter {
    count: u64,
    expires_at: Instant,
}

/// Process-local counters for development and tests. Each key is updated
/// under its DashMap entry lock, so a single tier never double-admits.
pub struct MemoryCounterStore {
    counters: DashMap<String, MemoryCounter>,
    capacity: usize,
}

impl MemoryCounterStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            counters: DashMap::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, counter| counter.expires_at > now);
        before.saturating_sub(self.counters.len())
    }

    /// Live count for `key`, 0 once expired.
    #[cfg(test)]
    pub(crate) fn count(&self, key: &str) -> u64 {
        self.counters
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map_or(0, |entry| entry.count)
    }

    fn ensure_room(&self, key: &str) -> Result<(), AppError> {
        if self.counters.len() < self.capacity || self.counters.contains_key(key) {
            return Ok(());
        }
        self.cleanup_expired();
        if self.counters.len() >= self.capacity {
            return Err(AppError::Internal("In-memory rate limit store is full".to_string()));
        }
        Ok(())
    }

    fn bump(&self, spec: &CounterSpec, now: Instant) -> Result<CounterReading, AppError> {
        self.ensure_room(&spec.key)?;
        let fresh = MemoryCounter {
            count: 1,
            expires_at: now + spec.window,
        };
        let counter = match self.counters.entry(spec.key.clone()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get_mut();
                if current.expires_at <= now {
                    *current = fresh;
                } else {
                    current.count += 1;
                }
                *current
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                fresh
            }
        };
        Ok(CounterReading {
            count: counter.count,
            ttl: counter.expires_at.saturating_duration_since(now),
        })
    }

    fn block_remaining(&self, key: &str, now: Instant) -> Option<Duration> {
        self.counters
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.expires_at.saturating_duration_since(now))
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, counters: &[CounterSpec], block_keys: &[String]) -> Result<IncrementOutcome, AppError> {
        let now = Instant::now();
        let counters = counters
            .iter()
            .map(|spec| self.bump(spec, now))
            .collect::<Result<Vec<_>, _>>()?;
        let blocks = block_keys.iter().map(|key| self.block_remaining(key, now)).collect();
        Ok(IncrementOutcome { counters, blocks })
    }

    async fn block(&self, block_key: &str, duration: Duration) -> Result<(), AppError> {
        self.ensure_room(block_key)?;
        self.counters.insert(
            block_key.to_string(),
            MemoryCounter {
                count: 1,
                expires_at: Instant::now() + duration,
            },
        );
        Ok(())
    }
}

/// Start a background task for cleaning up expired rate limit entries from memory stores
pub fn start_memory_store_cleanup_task(
    store: Arc<MemoryCounterStore>,
    cleanup_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    info!(
        "Starting rate limit memory store cleanup task (interval: {}s)",
        cleanup_interval.as_secs()
    );
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);
        loop {
            interval.tick().await;
            let removed = store.cleanup_expired();
            debug!("Rate limit cleanup removed {} expired entries", removed);
        }
    })
}
