// src/test_utils.rs

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, InMemoryConfig, RateLimitConfig};
use crate::context::OpContext;
use crate::error::{Result, StorageError};
use crate::limiter::RateLimiter;
use crate::storage::{MemoryStorage, StorageBackend};

/// Quota shorthand: `limit(5, 1_000, 5_000)`
pub fn limit(requests: u64, window_ms: u64, block_ms: u64) -> RateLimitConfig {
    RateLimitConfig::new(
        requests,
        Duration::from_millis(window_ms),
        Duration::from_millis(block_ms),
    )
}

/// Memory storage without the background janitor
pub fn quiet_memory() -> Arc<MemoryStorage> {
    Arc::new(MemoryStorage::new(InMemoryConfig {
        use_background_task: false,
        cleanup_interval: Duration::from_secs(60),
    }))
}

/// Rate limiter over a fresh memory storage, returning both
pub fn memory_limiter(config: Config) -> (Arc<MemoryStorage>, RateLimiter) {
    let storage = quiet_memory();
    let limiter = RateLimiter::new(storage.clone(), config);
    (storage, limiter)
}

/// Backend whose every operation fails, as if Redis were unreachable
#[derive(Debug, Default)]
pub struct FailingStorage {
    pub calls: AtomicUsize,
}

impl FailingStorage {
    fn fail<T>(&self, operation: &str) -> Result<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::RedisConnection(format!("{}: connection refused", operation)).into())
    }
}

#[async_trait]
impl StorageBackend for FailingStorage {
    async fn increment(&self, _ctx: &OpContext, _key: &str, _window: Duration) -> Result<i64> {
        self.fail("increment")
    }

    async fn get(&self, _ctx: &OpContext, _key: &str) -> Result<i64> {
        self.fail("get")
    }

    async fn set_block(&self, _ctx: &OpContext, _key: &str, _block: Duration) -> Result<()> {
        self.fail("set_block")
    }

    async fn is_blocked(&self, _ctx: &OpContext, _key: &str) -> Result<bool> {
        self.fail("is_blocked")
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Backend that never answers; only the context can end its calls
#[derive(Debug, Default)]
pub struct StalledStorage;

#[async_trait]
impl StorageBackend for StalledStorage {
    async fn increment(&self, ctx: &OpContext, _key: &str, _window: Duration) -> Result<i64> {
        ctx.run("increment", std::future::pending()).await
    }

    async fn get(&self, ctx: &OpContext, _key: &str) -> Result<i64> {
        ctx.run("get", std::future::pending()).await
    }

    async fn set_block(&self, ctx: &OpContext, _key: &str, _block: Duration) -> Result<()> {
        ctx.run("set_block", std::future::pending()).await
    }

    async fn is_blocked(&self, ctx: &OpContext, _key: &str) -> Result<bool> {
        ctx.run("is_blocked", std::future::pending()).await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
