//! SQL text for one lock table
//!
//! The table name cannot be bound as a parameter, so statements are rendered
//! once from a validated identifier and reused.

use pglock_core::Result;

use crate::options::validate_table_name;

#[derive(Debug, Clone)]
pub(crate) struct LockQueries {
    pub create_table: String,
    pub create_index: String,
    pub insert_if_absent: String,
    pub select: String,
    pub select_for_update: String,
    pub update: String,
}

impl LockQueries {
    pub fn new(table: &str) -> Result<Self> {
        validate_table_name(table)?;

        let columns = "xlock_id, x_expires_at, shared_locks, max_shared_locks";
        Ok(Self {
            create_table: format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    name TEXT PRIMARY KEY,
                    xlock_id TEXT,
                    x_expires_at TIMESTAMPTZ,
                    shared_locks JSONB DEFAULT '[]'::jsonb,
                    max_shared_locks INT DEFAULT -1
                )"
            ),
            create_index: format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_shared ON {table} USING GIN (shared_locks)"
            ),
            insert_if_absent: format!(
                "INSERT INTO {table} (name, {columns}) VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (name) DO NOTHING"
            ),
            select: format!("SELECT {columns} FROM {table} WHERE name = $1"),
            select_for_update: format!("SELECT {columns} FROM {table} WHERE name = $1 FOR UPDATE"),
            update: format!(
                "UPDATE {table} SET xlock_id = $1, x_expires_at = $2, shared_locks = $3 \
                 WHERE name = $4"
            ),
        })
    }
}
