//! Error types for lock operations
//!
//! Contention is not an error: a try-operation that loses the race returns
//! `acquired = false`. Everything below is either a caller-side abort of a
//! blocking wait or a failure of the backing store.

/// Errors returned by the lock client and its stores
#[derive(thiserror::Error, Debug)]
pub enum LockError {
    #[error("lock wait cancelled")]
    Cancelled,

    #[error("lock wait deadline exceeded")]
    DeadlineExceeded,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to parse shared_locks of lock '{name}': {source}")]
    CorruptSharedLocks {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode shared_locks: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("lock store is not connected")]
    NotConnected,

    #[error("store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl LockError {
    /// Wrap a backing-store failure without altering it
    pub fn store<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        LockError::Store(Box::new(err))
    }

    /// True when a blocking call gave up because the caller asked it to
    pub fn is_cancellation(&self) -> bool {
        matches!(self, LockError::Cancelled | LockError::DeadlineExceeded)
    }

    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            LockError::Store(_) | LockError::NotConnected | LockError::CorruptSharedLocks { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
