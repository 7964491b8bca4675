// library entry
pub mod config;
pub mod context;
pub mod error;
pub mod limiter;
pub mod logging;
pub mod middleware;
pub mod server;
pub mod storage;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use config::{Config, RateLimitConfig};
pub use context::OpContext;
pub use error::{RateLimiterError, Result, StorageError};
pub use limiter::{RateLimiter, Scope};
pub use logging::init as init_logging;
pub use middleware::{RateLimitLayer, RateLimitService};
pub use storage::{MemoryStorage, RedisStorage, StorageBackend};
