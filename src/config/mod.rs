// src/config/mod.rs

mod env;

pub use env::{AppConfig, StorageKind};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{RateLimiterError, Result};

/// Quota applied to one scoping key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed inside one window
    pub requests: u64,

    /// Length of the counting window
    #[serde(with = "duration_serde")]
    pub window: Duration,

    /// How long a key stays blocked once it overflows
    #[serde(with = "duration_serde")]
    pub block_duration: Duration,
}

impl RateLimitConfig {
    pub fn new(requests: u64, window: Duration, block_duration: Duration) -> Self {
        Self {
            requests,
            window,
            block_duration,
        }
    }

    /// Rejects quotas that could never admit a request or never expire
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.requests == 0 {
            return Err(RateLimiterError::Config(format!(
                "{}: requests must be greater than zero",
                name
            )));
        }
        if self.window.is_zero() {
            return Err(RateLimiterError::Config(format!(
                "{}: window must be greater than zero",
                name
            )));
        }
        if self.block_duration.is_zero() {
            return Err(RateLimiterError::Config(format!(
                "{}: block duration must be greater than zero",
                name
            )));
        }
        Ok(())
    }
}

/// Limits consumed by the rate limiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Default quota for callers identified by IP
    pub ip: RateLimitConfig,

    /// Default quota for callers presenting a token
    pub token: RateLimitConfig,

    /// Per-token overrides
    #[serde(default)]
    pub tokens: HashMap<String, RateLimitConfig>,
}

impl Config {
    pub fn new(ip: RateLimitConfig, token: RateLimitConfig) -> Self {
        Self {
            ip,
            token,
            tokens: HashMap::new(),
        }
    }

    /// Adds or replaces the override for `token`
    pub fn with_token(mut self, token: impl Into<String>, limit: RateLimitConfig) -> Self {
        self.tokens.insert(token.into(), limit);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.ip.validate("ip")?;
        self.token.validate("token")?;
        for (token, limit) in &self.tokens {
            limit.validate(&format!("token {}", token))?;
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            RateLimitConfig::new(5, Duration::from_secs(1), Duration::from_secs(300)),
            RateLimitConfig::new(10, Duration::from_secs(1), Duration::from_secs(300)),
        )
    }
}

/// Configuration for Redis storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Connection timeout
    #[serde(default = "default_conn_timeout", with = "duration_serde")]
    pub connection_timeout: Duration,
}

fn default_conn_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connection_timeout: default_conn_timeout(),
        }
    }
}

/// Configuration for in-memory storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Whether to use a background task for expiration
    #[serde(default = "default_use_background_task")]
    pub use_background_task: bool,

    /// How often to run the background expiration task
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,
}

fn default_use_background_task() -> bool {
    true
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            use_background_task: default_use_background_task(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

/// Parses Go-style duration strings such as `500ms`, `1s`, `5m` or `1h30m`.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(RateLimiterError::Config("empty duration".to_string()));
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    let invalid = || RateLimiterError::Config(format!("invalid duration: {:?}", input));

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let secs_per_unit = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];

        let part = Duration::try_from_secs_f64(value * secs_per_unit).map_err(|_| invalid())?;
        total = total.checked_add(part).ok_or_else(invalid)?;
    }

    Ok(total)
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
