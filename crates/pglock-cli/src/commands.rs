//! Administration commands

use std::sync::Arc;

use anyhow::{Context, bail};
use pglock_core::{LockClient, LockSnapshot, MemoryLockStore, UnlockParams};
use pglock_persistence::SqlLockStore;
use tracing::info;

use crate::config::Configuration;

const MISSING_DATABASE_URL: &str =
    "no database URL configured: pass --db-url, set DATABASE_URL or db.url, or use --memory";

/// Build a client over PostgreSQL, or over the in-process store with `memory`
pub async fn build_client(
    configuration: &Configuration,
    memory: bool,
) -> anyhow::Result<LockClient> {
    if memory {
        info!("Using in-memory lock store");
        return Ok(LockClient::new(Arc::new(MemoryLockStore::new())));
    }

    let options = configuration
        .lock_client_options()
        .context(MISSING_DATABASE_URL)?;
    info!(table = %options.lock_table_name, "Connecting to PostgreSQL lock store");
    Ok(pglock_persistence::connect_client(options).await?)
}

/// Connect and create the lock table
pub async fn setup(configuration: &Configuration, memory: bool) -> anyhow::Result<()> {
    if memory {
        bail!("setup needs a database; the in-memory store has no tables");
    }

    let options = configuration
        .lock_client_options()
        .context(MISSING_DATABASE_URL)?;
    let store = SqlLockStore::new(options)?;
    store.initialize().await?;
    info!(table = %store.table_name(), "Setup complete");
    Ok(())
}

/// Current holders of `name`, or `None` if the lock was never taken
pub async fn inspect(client: &LockClient, name: &str) -> anyhow::Result<Option<LockSnapshot>> {
    Ok(client.inspect(name).await?)
}

pub fn render_snapshot(snapshot: &LockSnapshot) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

/// Release every claim `lock_id` holds on `name`
pub async fn unlock(client: &LockClient, name: &str, lock_id: &str) -> anyhow::Result<bool> {
    let result = client
        .unlock(&UnlockParams {
            name: name.to_string(),
            lock_id: lock_id.to_string(),
        })
        .await?;
    Ok(result.released)
}
