//! pglock Persistence - PostgreSQL backing store for pglock
//!
//! This crate provides:
//! - `LockClientOptions`: connection pool and table settings
//! - `SqlLockStore`: a `LockStore` over a sea-orm `DatabaseConnection`,
//!   using row locks (`SELECT ... FOR UPDATE`) for every mutation
//! - Idempotent schema setup for the lock table

pub mod options;
pub mod sql;

pub use options::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_LOCK_TABLE_NAME, DEFAULT_MAX_IDLE_CONNECTIONS,
    DEFAULT_MAX_OPEN_CONNECTIONS, LockClientOptions, validate_table_name,
};
pub use sql::SqlLockStore;

use std::sync::Arc;

use pglock_core::{LockClient, Result};

/// Connect, create the lock table if needed and return a ready client
pub async fn connect_client(options: LockClientOptions) -> Result<LockClient> {
    let store = SqlLockStore::new(options)?;
    store.initialize().await?;
    Ok(LockClient::new(Arc::new(store)))
}
