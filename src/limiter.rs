// src/limiter.rs

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::config::{Config, RateLimitConfig};
use crate::context::OpContext;
use crate::error::Result;
use crate::rate_limit_event;
use crate::storage::StorageBackend;

/// Who a request is counted against.
///
/// A non-empty token always wins over the caller's IP.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    ByToken(String),
    ByIdentifier(String),
}

impl Scope {
    pub fn resolve(identifier: &str, token: &str) -> Self {
        if token.is_empty() {
            Scope::ByIdentifier(identifier.to_string())
        } else {
            Scope::ByToken(token.to_string())
        }
    }

    /// Storage key partitioning this scope's counter and block flag.
    ///
    /// The caller-supplied part is escaped so it never contains `:`. A
    /// counter key therefore has exactly one colon, while every block key
    /// has at least two, and no caller can address another caller's flag.
    pub fn key(&self) -> String {
        match self {
            Scope::ByToken(token) => format!("token:{}", escape_key_part(token)),
            Scope::ByIdentifier(ip) => format!("ip:{}", escape_key_part(ip)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Scope::ByToken(_) => "token",
            Scope::ByIdentifier(_) => "ip",
        }
    }
}

// Percent-encodes `%` and `:`; everything else passes through unchanged
fn escape_key_part(raw: &str) -> Cow<'_, str> {
    if !raw.contains(|c| c == ':' || c == '%') {
        return Cow::Borrowed(raw);
    }

    let mut escaped = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Fixed-window rate limiter with a block period on overflow.
///
/// Each scoping key moves between two states. While unblocked, requests are
/// counted against the quota; the request that pushes the counter past the
/// quota sets a block flag, and every request is rejected until that flag
/// expires. Blocked requests do not touch the counter.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    storage: Arc<dyn StorageBackend>,
    config: Arc<Config>,
}

impl RateLimiter {
    pub fn new(storage: Arc<dyn StorageBackend>, config: Config) -> Self {
        Self {
            storage,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// Quota that applies to `scope`
    pub fn quota(&self, scope: &Scope) -> &RateLimitConfig {
        match scope {
            Scope::ByToken(token) => self.config.tokens.get(token).unwrap_or(&self.config.token),
            Scope::ByIdentifier(_) => &self.config.ip,
        }
    }

    /// Counts one request and decides whether it may proceed.
    ///
    /// `Ok(false)` is a rejection; storage failures come back as `Err` and
    /// must not be read as either verdict.
    pub async fn check_limit(&self, ctx: &OpContext, identifier: &str, token: &str) -> Result<bool> {
        let scope = Scope::resolve(identifier, token);
        let key = scope.key();
        let quota = self.quota(&scope);

        if self.storage.is_blocked(ctx, &key).await? {
            tracing::debug!(key = key.as_str(), "Rejected while blocked");
            return Ok(false);
        }

        let count = self.storage.increment(ctx, &key, quota.window).await?;
        let allowed = count <= i64::try_from(quota.requests).unwrap_or(i64::MAX);

        rate_limit_event!(scope.kind(), key.as_str(), allowed, count, quota.requests);

        if !allowed {
            self.storage
                .set_block(ctx, &key, quota.block_duration)
                .await?;
            tracing::info!(
                key = key.as_str(),
                block_duration = ?quota.block_duration,
                "Limit exceeded, blocking"
            );
        }

        Ok(allowed)
    }

    /// Requests left in the current window. Never mutates storage.
    pub async fn get_remaining_requests(
        &self,
        ctx: &OpContext,
        identifier: &str,
        token: &str,
    ) -> Result<u64> {
        let scope = Scope::resolve(identifier, token);
        let quota = self.quota(&scope);

        let count = self.storage.get(ctx, &scope.key()).await?;
        Ok(quota.requests.saturating_sub(count.max(0) as u64))
    }

    /// Releases the storage backend's background resources
    pub async fn close(&self) -> Result<()> {
        self.storage.close().await
    }
}
