// for error definitions
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateLimiterError {
    /// Errors related to the storage backend
    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// Configuration-related errors, raised while loading or validating
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RateLimiterError {
    /// True when the failure came from the storage backend
    pub fn is_storage(&self) -> bool {
        matches!(self, RateLimiterError::Storage(_))
    }
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Redis connection errors
    #[error("Redis connection error: {0}")]
    RedisConnection(String),

    // Redis authentication errors
    #[error("Redis authentication error: {0}")]
    RedisAuth(String),

    /// Redis command errors
    #[error("Redis command error: {0}")]
    RedisCommand(String),

    /// The caller cancelled the operation context
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// The operation context deadline passed before the backend answered
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// A writer panicked while holding the in-memory map lock
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl From<StorageError> for RateLimiterError {
    fn from(err: StorageError) -> Self {
        RateLimiterError::Storage(err)
    }
}

// Implement conversions from redis::RedisError to StorageError
impl From<redis::RedisError> for RateLimiterError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::AuthenticationFailed => {
                // authentication errors
                RateLimiterError::Storage(StorageError::RedisAuth(err.to_string()))
            }
            redis::ErrorKind::IoError | redis::ErrorKind::ClientError => {
                // Connection-related errors
                RateLimiterError::Storage(StorageError::RedisConnection(err.to_string()))
            }
            _ => {
                // Command/operation related errors
                RateLimiterError::Storage(StorageError::RedisCommand(err.to_string()))
            }
        }
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, RateLimiterError>;
