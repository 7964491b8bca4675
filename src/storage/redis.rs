// src/storage/redis.rs

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::RedisConfig;
use crate::context::OpContext;
use crate::error::{RateLimiterError, Result, StorageError};
use crate::storage::{blocked_key, StorageBackend};
use crate::storage_op;

/// INCR and arm the window TTL in one round trip.
///
/// The TTL is only set when the counter was just created, so later
/// increments never extend the window. A counter that somehow lost its TTL
/// is re-armed instead of living forever.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 or redis.call('PTTL', KEYS[1]) == -1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

pub struct RedisStorage {
    connection: ConnectionManager,
    increment_script: Script,
    config: RedisConfig,
    closed: AtomicBool,
}

// ConnectionManager carries no useful Debug output
impl fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStorage")
            .field("connection_timeout", &self.config.connection_timeout)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().max(1) as u64
}

impl RedisStorage {
    /// Connects to Redis and verifies the connection with a PING.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        // Open the client - this doesn't actually connect to Redis yet
        let client = Client::open(config.url.as_str())
            .map_err(|e| RateLimiterError::Storage(StorageError::RedisConnection(e.to_string())))?;

        let connection =
            match tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
                .await
            {
                Ok(result) => result.map_err(|e| {
                    RateLimiterError::Storage(StorageError::RedisConnection(e.to_string()))
                })?,
                Err(_) => {
                    return Err(RateLimiterError::Storage(StorageError::RedisConnection(
                        format!(
                            "Connection to Redis timed out after {:?}",
                            config.connection_timeout
                        ),
                    )));
                }
            };

        let storage = Self {
            connection,
            increment_script: Script::new(INCREMENT_SCRIPT),
            config,
            closed: AtomicBool::new(false),
        };
        storage.ping().await?;

        Ok(storage)
    }

    /// Ping Redis to check health with timeout
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection()?;
        let ctx = OpContext::with_timeout(self.config.connection_timeout);

        let result: String = ctx
            .run("ping", async {
                Ok(redis::AsyncCommands::ping::<String>(&mut conn).await?)
            })
            .await?;

        if result == "PONG" {
            Ok(())
        } else {
            Err(RateLimiterError::Storage(StorageError::RedisCommand(
                format!("Unexpected response from Redis PING: {}", result),
            )))
        }
    }

    // ConnectionManager is multiplexed; each call works on its own clone
    fn connection(&self) -> Result<ConnectionManager> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RateLimiterError::Storage(StorageError::RedisConnection(
                "storage is closed".to_string(),
            )));
        }
        Ok(self.connection.clone())
    }
}

#[async_trait]
impl StorageBackend for RedisStorage {
    async fn increment(&self, ctx: &OpContext, key: &str, window: Duration) -> Result<i64> {
        let mut conn = self.connection()?;
        let started = Instant::now();

        let result = ctx
            .run("increment", async {
                let count: i64 = self
                    .increment_script
                    .key(key)
                    .arg(millis(window))
                    .invoke_async(&mut conn)
                    .await?;
                Ok(count)
            })
            .await;

        storage_op!("increment", key, result, started.elapsed().as_millis() as u64);
        result
    }

    async fn get(&self, ctx: &OpContext, key: &str) -> Result<i64> {
        let mut conn = self.connection()?;
        let started = Instant::now();

        let result = ctx
            .run("get", async {
                let value: Option<i64> = conn.get(key).await?;
                Ok(value.unwrap_or(0))
            })
            .await;

        storage_op!("get", key, result, started.elapsed().as_millis() as u64);
        result
    }

    async fn set_block(&self, ctx: &OpContext, key: &str, block_duration: Duration) -> Result<()> {
        let mut conn = self.connection()?;
        let block_key = blocked_key(key);
        let started = Instant::now();

        let result = ctx
            .run("set_block", async {
                let _: () = conn
                    .pset_ex(&block_key, 1, millis(block_duration))
                    .await?;
                Ok(())
            })
            .await;

        storage_op!("set_block", block_key.as_str(), result, started.elapsed().as_millis() as u64);
        result
    }

    async fn is_blocked(&self, ctx: &OpContext, key: &str) -> Result<bool> {
        let mut conn = self.connection()?;
        let block_key = blocked_key(key);
        let started = Instant::now();

        let result = ctx
            .run("is_blocked", async {
                let flag: Option<String> = conn.get(&block_key).await?;
                Ok(flag.as_deref() == Some("1"))
            })
            .await;

        storage_op!("is_blocked", block_key.as_str(), result, started.elapsed().as_millis() as u64);
        result
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("Redis storage closed");
        } else {
            debug!("Redis storage already closed");
        }
        Ok(())
    }
}
