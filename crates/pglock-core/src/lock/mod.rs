//! Distributed lock implementation
//!
//! This module provides:
//! - Lock row data model and protocol transitions (`model`)
//! - Backing store abstraction (`store`) and in-memory store (`memory`)
//! - Lock client operations (`client`)
//! - Retry loop and cancellation signal for blocking calls (`retry`)

mod client;
mod memory;
mod model;
mod retry;
mod store;

pub use client::*;
pub use memory::MemoryLockStore;
pub use model::*;
pub use retry::{CancelSignal, DEFAULT_RETRY_INTERVAL};
pub use store::{LockStore, RowUpdate};
