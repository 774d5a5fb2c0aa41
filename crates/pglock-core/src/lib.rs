//! pglock Core - lease-based exclusive/shared locks over a row-lockable store
//!
//! This crate provides:
//! - The lock row model and its claim/release transitions
//! - The `LockStore` seam and an in-process `MemoryLockStore`
//! - `LockClient` with try and blocking acquisition, release and inspection
//! - Cancellation signal and retry wrapper for the blocking calls

pub mod error;
pub mod lock;

pub use error::{LockError, Result};

pub use lock::{
    CancelSignal, DEFAULT_RETRY_INTERVAL, ExclusiveClaim, LockClient, LockResult, LockRow,
    LockSnapshot, LockStore, MemoryLockStore, RowUpdate, SLockParams, SharedLockEntry,
    TryLockResult, TrySLockParams, TryXLockParams, UNLIMITED_SHARED_LOCKS, UnlockParams,
    UnlockResult, XLockParams,
};
