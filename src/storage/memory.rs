// src/storage/memory.rs

// In-memory storage for single-process deployments and tests.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::task::{self, JoinHandle};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::InMemoryConfig;
use crate::context::OpContext;
use crate::error::{Result, StorageError};
use crate::storage::{blocked_key, StorageBackend};

/// Entry in the in-memory storage
#[derive(Debug)]
struct MemoryEntry {
    value: i64,
    expiry: Instant,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expiry > now
    }
}

type Entries = Arc<RwLock<HashMap<String, MemoryEntry>>>;

// tokio intervals reject a zero period
const MIN_CLEANUP_INTERVAL: Duration = Duration::from_millis(1);

/// In-memory storage backend implementation.
///
/// Counters and block flags share one map behind a single `RwLock`. Writers
/// (`increment`, `set_block`) hold the write lock for the whole
/// read-modify-write so concurrent increments never lose updates.
#[derive(Debug)]
pub struct MemoryStorage {
    data: Entries,
    shutdown: CancellationToken,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryStorage {
    /// Creates a new in-memory storage with the given configuration.
    ///
    /// With `use_background_task` set this must be called inside a tokio
    /// runtime, since the janitor is spawned immediately.
    pub fn new(config: InMemoryConfig) -> Self {
        let data: Entries = Arc::new(RwLock::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        let cleanup_task = if config.use_background_task {
            Some(task::spawn(Self::run_janitor(
                Arc::clone(&data),
                config.cleanup_interval,
                shutdown.clone(),
            )))
        } else {
            None
        };

        Self {
            data,
            shutdown,
            cleanup_task: Mutex::new(cleanup_task),
        }
    }

    async fn run_janitor(data: Entries, every: Duration, shutdown: CancellationToken) {
        let mut interval = time::interval(every.max(MIN_CLEANUP_INTERVAL));
        // the first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match Self::cleanup_expired_entries(&data) {
                        Ok(0) => {}
                        Ok(evicted) => debug!(evicted, "Evicted expired entries"),
                        Err(e) => warn!("Skipping eviction sweep: {}", e),
                    }
                }
            }
        }

        debug!("Memory storage janitor stopped");
    }

    /// Clean up expired entries, returning how many were removed
    fn cleanup_expired_entries(data: &Entries) -> Result<usize> {
        let now = Instant::now();
        let mut data = data
            .write()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))?;

        let before = data.len();
        data.retain(|_, entry| entry.is_live(now));
        Ok(before - data.len())
    }

    /// Runs one eviction sweep immediately
    pub fn evict_expired(&self) -> Result<usize> {
        Self::cleanup_expired_entries(&self.data)
    }

    /// Number of entries physically held, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.read().map(|data| data.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, MemoryEntry>>> {
        Ok(self
            .data
            .read()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))?)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, MemoryEntry>>> {
        Ok(self
            .data
            .write()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))?)
    }

    fn increment_now(&self, key: &str, window: Duration) -> Result<i64> {
        let now = Instant::now();
        let mut data = self.write()?;

        if let Some(entry) = data.get_mut(key) {
            if entry.is_live(now) {
                entry.value += 1;
                return Ok(entry.value);
            }
        }

        // Missing or expired: a new window starts here
        data.insert(
            key.to_string(),
            MemoryEntry {
                value: 1,
                expiry: now + window,
            },
        );
        Ok(1)
    }

    fn live_value(&self, key: &str) -> Result<Option<i64>> {
        let now = Instant::now();
        let data = self.read()?;
        Ok(data
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value))
    }
}

impl Drop for MemoryStorage {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn increment(&self, ctx: &OpContext, key: &str, window: Duration) -> Result<i64> {
        ctx.run("increment", async { self.increment_now(key, window) })
            .await
    }

    async fn get(&self, ctx: &OpContext, key: &str) -> Result<i64> {
        ctx.run("get", async { Ok(self.live_value(key)?.unwrap_or(0)) })
            .await
    }

    async fn set_block(&self, ctx: &OpContext, key: &str, block_duration: Duration) -> Result<()> {
        ctx.run("set_block", async {
            let mut data = self.write()?;
            data.insert(
                blocked_key(key),
                MemoryEntry {
                    value: 1,
                    expiry: Instant::now() + block_duration,
                },
            );
            Ok(())
        })
        .await
    }

    async fn is_blocked(&self, ctx: &OpContext, key: &str) -> Result<bool> {
        ctx.run("is_blocked", async {
            Ok(self.live_value(&blocked_key(key))? == Some(1))
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        let handle = self
            .cleanup_task
            .lock()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))?
            .take();

        self.shutdown.cancel();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Memory storage janitor ended abnormally: {}", e);
            }
        }

        Ok(())
    }
}
