// src/config/env.rs

//! Loading the application configuration from environment variables.

use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::{parse_duration, Config, InMemoryConfig, RateLimitConfig, RedisConfig};
use crate::error::{RateLimiterError, Result};

/// Which storage backend the server should run against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Memory,
    Redis,
}

impl FromStr for StorageKind {
    type Err = RateLimiterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageKind::Memory),
            "redis" => Ok(StorageKind::Redis),
            other => Err(RateLimiterError::Config(format!(
                "unknown storage backend: {}",
                other
            ))),
        }
    }
}

/// Everything the server binary needs, resolved from the environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub limits: Config,
    pub storage: StorageKind,
    pub redis: RedisConfig,
    pub memory: InMemoryConfig,
    /// Upper bound on the storage work done for one request
    pub request_timeout: Duration,
    pub server_port: u16,
}

impl AppConfig {
    /// Reads the process environment. Call `dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let limits = Config {
            ip: limit_from(&var, "RATE_LIMIT_IP", 5)?,
            token: limit_from(&var, "RATE_LIMIT_TOKEN", 10)?,
            tokens: match var("RATE_LIMIT_TOKENS") {
                Some(raw) => parse_token_overrides(&raw)?,
                None => Default::default(),
            },
        };
        limits.validate()?;

        let storage = match var("STORAGE_BACKEND") {
            Some(raw) => raw.parse::<StorageKind>()?,
            None => StorageKind::Redis,
        };

        let redis = RedisConfig {
            url: match var("REDIS_URL") {
                Some(url) => url,
                None => redis_url(
                    &var("REDIS_HOST").unwrap_or_else(|| "localhost".to_string()),
                    &var("REDIS_PORT").unwrap_or_else(|| "6379".to_string()),
                    var("REDIS_PASSWORD").as_deref(),
                    parse_number(&var, "REDIS_DB", 0)?,
                ),
            },
            ..RedisConfig::default()
        };

        let memory = InMemoryConfig {
            cleanup_interval: nonzero_duration_from(
                &var,
                "MEMORY_CLEANUP_INTERVAL",
                Duration::from_secs(60),
            )?,
            ..InMemoryConfig::default()
        };

        let config = Self {
            limits,
            storage,
            redis,
            memory,
            request_timeout: nonzero_duration_from(&var, "REQUEST_TIMEOUT", Duration::from_secs(5))?,
            server_port: parse_number(&var, "SERVER_PORT", 8080)?,
        };

        debug!(storage = ?config.storage, tokens = config.limits.tokens.len(), "Configuration loaded");
        Ok(config)
    }
}

fn limit_from<F>(var: &F, prefix: &str, default_requests: u64) -> Result<RateLimitConfig>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(RateLimitConfig {
        requests: parse_number(var, &format!("{}_REQUESTS", prefix), default_requests)?,
        window: duration_from(var, &format!("{}_DURATION", prefix), Duration::from_secs(1))?,
        block_duration: duration_from(
            var,
            &format!("{}_BLOCK_DURATION", prefix),
            Duration::from_secs(300),
        )?,
    })
}

fn parse_number<F, T>(var: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| RateLimiterError::Config(format!("{}: not a number: {:?}", key, raw))),
        None => Ok(default),
    }
}

fn duration_from<F>(var: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => parse_duration(&raw)
            .map_err(|e| RateLimiterError::Config(format!("{}: {}", key, e))),
        None => Ok(default),
    }
}

fn nonzero_duration_from<F>(var: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let duration = duration_from(var, key, default)?;
    if duration.is_zero() {
        return Err(RateLimiterError::Config(format!(
            "{}: must be greater than zero",
            key
        )));
    }
    Ok(duration)
}

/// Parses `token:requests:window:block` entries separated by commas
pub(crate) fn parse_token_overrides(
    raw: &str,
) -> Result<std::collections::HashMap<String, RateLimitConfig>> {
    let mut tokens = std::collections::HashMap::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let parts: Vec<&str> = entry.split(':').collect();
        let [token, requests, window, block] = parts.as_slice() else {
            return Err(RateLimiterError::Config(format!(
                "RATE_LIMIT_TOKENS: expected token:requests:window:block, got {:?}",
                entry
            )));
        };
        if token.is_empty() {
            return Err(RateLimiterError::Config(
                "RATE_LIMIT_TOKENS: empty token".to_string(),
            ));
        }

        let requests = requests.parse().map_err(|_| {
            RateLimiterError::Config(format!(
                "RATE_LIMIT_TOKENS: invalid request count for {}: {:?}",
                token, requests
            ))
        })?;

        tokens.insert(
            token.to_string(),
            RateLimitConfig {
                requests,
                window: parse_duration(window)?,
                block_duration: parse_duration(block)?,
            },
        );
    }

    Ok(tokens)
}

fn redis_url(host: &str, port: &str, password: Option<&str>, db: u32) -> String {
    match password {
        Some(password) => format!("redis://:{}@{}:{}/{}", password, host, port, db),
        None => format!("redis://{}:{}/{}", host, port, db),
    }
}
