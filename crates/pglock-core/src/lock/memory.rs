//! In-process lock store
//!
//! Keeps rows in a `DashMap`, one mutex per row standing in for the database
//! row lock. The shared set is kept in its persisted JSON form so reads go
//! through the same decoding as the SQL store.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;

use super::model::{ExclusiveClaim, LockRow, SharedLockEntry};
use super::store::{LockStore, RowUpdate};
use crate::error::Result;

/// Stored form of a row, mirroring the table columns
#[derive(Debug, Clone)]
struct StoredRow {
    exclusive: Option<ExclusiveClaim>,
    shared_locks: serde_json::Value,
    max_shared_locks: i32,
}

impl StoredRow {
    fn encode(row: &LockRow) -> Result<Self> {
        Ok(Self {
            exclusive: row.exclusive.clone(),
            shared_locks: SharedLockEntry::encode_all(&row.shared)?,
            max_shared_locks: row.max_shared_locks,
        })
    }

    fn decode(&self, name: &str) -> Result<LockRow> {
        Ok(LockRow {
            name: name.to_string(),
            exclusive: self.exclusive.clone(),
            shared: SharedLockEntry::decode_all(name, Some(&self.shared_locks))?,
            max_shared_locks: self.max_shared_locks,
        })
    }
}

/// Lock store living in the current process
///
/// Useful for tests and single-process deployments; it gives the same
/// guarantees as the SQL store between tasks sharing one instance.
#[derive(Default)]
pub struct MemoryLockStore {
    rows: DashMap<String, Arc<Mutex<StoredRow>>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows ever created
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Store a row whose shared set is given in raw persisted form, replacing
    /// any existing row. Lets callers reproduce data written by other clients,
    /// including malformed data.
    pub fn put_raw(
        &self,
        name: &str,
        exclusive: Option<ExclusiveClaim>,
        shared_locks: serde_json::Value,
        max_shared_locks: i32,
    ) {
        let stored = StoredRow {
            exclusive,
            shared_locks,
            max_shared_locks,
        };
        self.rows
            .insert(name.to_string(), Arc::new(Mutex::new(stored)));
    }

    fn row_cell(&self, name: &str) -> Option<Arc<Mutex<StoredRow>>> {
        self.rows.get(name).map(|entry| entry.value().clone())
    }

    fn apply_locked(cell: &Mutex<StoredRow>, name: &str, apply: RowUpdate<'_>) -> Result<bool> {
        let mut stored = cell.lock();
        // Work on a decoded copy; nothing is written back unless `apply`
        // reports a change and the new state encodes cleanly.
        let mut row = stored.decode(name)?;
        if !apply(&mut row) {
            return Ok(false);
        }
        *stored = StoredRow::encode(&row)?;
        Ok(true)
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn insert_if_absent(&self, row: &LockRow) -> Result<bool> {
        let stored = StoredRow::encode(row)?;
        match self.rows.entry(row.name.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(Mutex::new(stored)));
                Ok(true)
            }
        }
    }

    async fn update_locked(&self, name: &str, apply: RowUpdate<'_>) -> Result<Option<bool>> {
        let Some(cell) = self.row_cell(name) else {
            return Ok(None);
        };
        Self::apply_locked(&cell, name, apply).map(Some)
    }

    async fn load(&self, name: &str) -> Result<Option<LockRow>> {
        match self.row_cell(name) {
            Some(cell) => {
                let stored = cell.lock().clone();
                stored.decode(name).map(Some)
            }
            None => Ok(None),
        }
    }
}
