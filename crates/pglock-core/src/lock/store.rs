//! Backing store abstraction
//!
//! A store only has to offer three things: an atomic insert-if-absent, a
//! read/modify/write of one row under an exclusive row lock, and a plain read.
//! All protocol decisions are made by the client inside `update_locked`.

use async_trait::async_trait;

use super::model::LockRow;
use crate::error::Result;

/// Row mutation run while the row lock is held.
///
/// Returns `true` when the row was changed and must be written back.
pub type RowUpdate<'a> = &'a mut (dyn FnMut(&mut LockRow) -> bool + Send);

/// Transactional, row-lockable storage of lock rows
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Create `row` unless a row with the same name exists.
    ///
    /// Returns `true` if this call created it.
    async fn insert_if_absent(&self, row: &LockRow) -> Result<bool>;

    /// Lock the row for `name`, run `apply` on its current state and persist
    /// the result if `apply` reports a change, all in one transaction.
    ///
    /// Returns `None` if the row does not exist, otherwise whether it was
    /// written. Any error rolls the transaction back.
    async fn update_locked(&self, name: &str, apply: RowUpdate<'_>) -> Result<Option<bool>>;

    /// Read the row for `name` without locking it
    async fn load(&self, name: &str) -> Result<Option<LockRow>>;
}
