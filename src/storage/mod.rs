// src/storage/mod.rs

pub mod memory;
pub mod redis;

#[cfg(test)]
mod tests;

pub use memory::MemoryStorage;
pub use redis::RedisStorage;

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{AppConfig, StorageKind};
use crate::context::OpContext;
use crate::error::Result;

/// Suffix appended to a counter key to form its block flag key
pub const BLOCK_SUFFIX: &str = ":blocked";

/// Key of the block flag shadowing `key`
pub fn blocked_key(key: &str) -> String {
    format!("{}{}", key, BLOCK_SUFFIX)
}

/// Core trait that all storage backends must implement.
///
/// Counters follow fixed-window semantics: the window starts with the first
/// increment of a key and is never extended by later increments.
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    /// Adds one to the counter for `key` and returns the new total.
    ///
    /// A missing or expired counter is recreated with value 1 and a TTL of
    /// `window`.
    async fn increment(&self, ctx: &OpContext, key: &str, window: Duration) -> Result<i64>;

    /// Current value of a live counter, or 0
    async fn get(&self, ctx: &OpContext, key: &str) -> Result<i64>;

    /// Creates or overwrites the block flag for `key`
    async fn set_block(&self, ctx: &OpContext, key: &str, block_duration: Duration) -> Result<()>;

    /// Whether an unexpired block flag exists for `key`
    async fn is_blocked(&self, ctx: &OpContext, key: &str) -> Result<bool>;

    /// Releases background resources. Calls after the first are no-ops.
    async fn close(&self) -> Result<()>;
}

/// Builds the backend selected by the application configuration.
///
/// Failing to reach Redis is returned as an error; callers treat it as fatal.
pub async fn connect(config: &AppConfig) -> Result<Arc<dyn StorageBackend>> {
    match config.storage {
        StorageKind::Memory => {
            info!(
                cleanup_interval = ?config.memory.cleanup_interval,
                "Using in-memory storage"
            );
            Ok(Arc::new(MemoryStorage::new(config.memory.clone())))
        }
        StorageKind::Redis => {
            let storage = RedisStorage::new(config.redis.clone()).await?;
            info!("Connected to Redis successfully");
            Ok(Arc::new(storage))
        }
    }
}
