//! Lock row data model
//!
//! One row per lock name holds the exclusive claim, the shared claims and the
//! shared capacity. Validity is always decided against a caller-supplied `now`
//! so that every transition is a pure function of the row and the clock.

use std::time::Duration;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::retry::CancelSignal;
use crate::error::{LockError, Result};

/// Capacity value meaning "no limit on shared holders"
pub const UNLIMITED_SHARED_LOCKS: i32 = -1;

/// One shared claim, persisted as an element of the `shared_locks` JSON array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedLockEntry {
    pub lock_id: String,
    pub expires_at: DateTime<Utc>,
}

impl SharedLockEntry {
    pub fn new(lock_id: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            lock_id: lock_id.into(),
            expires_at,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Decode a persisted shared set. `NULL` decodes as an empty set; anything
    /// that is not an array of entries is reported as corruption.
    pub fn decode_all(name: &str, raw: Option<&serde_json::Value>) -> Result<Vec<Self>> {
        match raw {
            None | Some(serde_json::Value::Null) => Ok(Vec::new()),
            Some(value) => Vec::<Self>::deserialize(value).map_err(|source| {
                LockError::CorruptSharedLocks {
                    name: name.to_string(),
                    source,
                }
            }),
        }
    }

    pub fn encode_all(entries: &[Self]) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(entries)?)
    }
}

/// The single exclusive claim of a row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusiveClaim {
    pub lock_id: String,
    pub expires_at: DateTime<Utc>,
}

impl ExclusiveClaim {
    pub fn new(lock_id: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            lock_id: lock_id.into(),
            expires_at,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Persisted state of one named lock
///
/// Expired claims are not removed eagerly: they stay in the row until an
/// operation rewrites it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRow {
    pub name: String,
    pub exclusive: Option<ExclusiveClaim>,
    pub shared: Vec<SharedLockEntry>,
    /// Fixed when the row is created; `-1` means unlimited
    pub max_shared_locks: i32,
}

impl LockRow {
    /// Row as created by a first exclusive claimant
    pub fn with_exclusive(
        name: impl Into<String>,
        lock_id: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            exclusive: Some(ExclusiveClaim::new(lock_id, expires_at)),
            shared: Vec::new(),
            max_shared_locks: UNLIMITED_SHARED_LOCKS,
        }
    }

    /// Row as created by a first shared claimant, which also fixes the capacity
    pub fn with_shared(
        name: impl Into<String>,
        lock_id: impl Into<String>,
        expires_at: DateTime<Utc>,
        max_shared_locks: i32,
    ) -> Self {
        Self {
            name: name.into(),
            exclusive: None,
            shared: vec![SharedLockEntry::new(lock_id, expires_at)],
            max_shared_locks,
        }
    }

    pub fn valid_exclusive(&self, now: DateTime<Utc>) -> Option<&ExclusiveClaim> {
        self.exclusive.as_ref().filter(|claim| claim.is_valid_at(now))
    }

    pub fn valid_shared(&self, now: DateTime<Utc>) -> impl Iterator<Item = &SharedLockEntry> {
        self.shared.iter().filter(move |entry| entry.is_valid_at(now))
    }

    /// Whether `count` valid holders already fill the capacity
    pub fn is_at_capacity(&self, count: usize) -> bool {
        // Any negative capacity is treated as unlimited
        usize::try_from(self.max_shared_locks)
            .map(|limit| count >= limit)
            .unwrap_or(false)
    }

    /// Try to take the exclusive claim.
    ///
    /// Fails while any exclusive claim (including the caller's own) or any
    /// shared claim is still valid. On success only the exclusive claim is
    /// rewritten.
    pub fn claim_exclusive(
        &mut self,
        lock_id: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.valid_exclusive(now).is_some() {
            return false;
        }
        if self.valid_shared(now).next().is_some() {
            return false;
        }

        self.exclusive = Some(ExclusiveClaim::new(lock_id, expires_at));
        true
    }

    /// Try to take or renew a shared claim.
    ///
    /// A holder that already has a valid entry is renewed in place and never
    /// counted against the capacity. On success the shared set is replaced by
    /// its valid subset, which drops expired entries.
    pub fn claim_shared(
        &mut self,
        lock_id: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.valid_exclusive(now).is_some() {
            return false;
        }

        let mut valid: Vec<SharedLockEntry> = self.valid_shared(now).cloned().collect();

        if let Some(pos) = valid.iter().position(|entry| entry.lock_id == lock_id) {
            valid[pos].expires_at = expires_at;
        } else {
            if self.is_at_capacity(valid.len()) {
                return false;
            }
            valid.push(SharedLockEntry::new(lock_id, expires_at));
        }

        self.shared = valid;
        true
    }

    /// Drop every claim held by `lock_id`, valid or not.
    ///
    /// Returns whether anything was removed.
    pub fn release(&mut self, lock_id: &str) -> bool {
        let mut released = false;

        if self
            .exclusive
            .as_ref()
            .is_some_and(|claim| claim.lock_id == lock_id)
        {
            self.exclusive = None;
            released = true;
        }

        let before = self.shared.len();
        self.shared.retain(|entry| entry.lock_id != lock_id);

        released || self.shared.len() != before
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> LockSnapshot {
        let shared: Vec<SharedLockEntry> = self.valid_shared(now).cloned().collect();
        let stale_exclusive =
            usize::from(self.exclusive.is_some() && self.valid_exclusive(now).is_none());

        LockSnapshot {
            name: self.name.clone(),
            exclusive: self.valid_exclusive(now).cloned(),
            stale_entries: stale_exclusive + (self.shared.len() - shared.len()),
            shared,
            max_shared_locks: self.max_shared_locks,
        }
    }
}

/// Point-in-time view of a lock's valid holders
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockSnapshot {
    pub name: String,
    pub exclusive: Option<ExclusiveClaim>,
    pub shared: Vec<SharedLockEntry>,
    pub max_shared_locks: i32,
    /// Expired claims still stored in the row
    pub stale_entries: usize,
}

impl LockSnapshot {
    pub fn is_free(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty()
    }

    pub fn holders(&self) -> Vec<&str> {
        self.exclusive
            .iter()
            .map(|claim| claim.lock_id.as_str())
            .chain(self.shared.iter().map(|entry| entry.lock_id.as_str()))
            .collect()
    }
}

/// Expiry of a lease starting at `now`, at the microsecond precision of a
/// PostgreSQL `TIMESTAMPTZ`
pub fn lease_expiry(now: DateTime<Utc>, ttl_seconds: u32) -> DateTime<Utc> {
    (now + TimeDelta::seconds(i64::from(ttl_seconds))).trunc_subsecs(6)
}

// ============================================================================
// Operation parameters and results
// ============================================================================

/// Parameters for a non-blocking exclusive acquisition
#[derive(Debug, Clone, Default)]
pub struct TryXLockParams {
    /// Lock name: unique identifier of the resource
    pub name: String,
    /// Identifier of the entity requesting the lock
    pub lock_id: String,
    /// Lease duration in seconds
    pub ttl_seconds: u32,
}

/// Parameters for a blocking exclusive acquisition
#[derive(Debug, Clone, Default)]
pub struct XLockParams {
    pub name: String,
    pub lock_id: String,
    pub ttl_seconds: u32,
    /// Delay between attempts (default: 100ms)
    pub retry_interval: Option<Duration>,
    /// Give up with `DeadlineExceeded` after this long
    pub timeout: Option<Duration>,
    /// Give up with `Cancelled` when this fires
    pub cancel: Option<CancelSignal>,
}

/// Parameters for a non-blocking shared acquisition
#[derive(Debug, Clone)]
pub struct TrySLockParams {
    pub name: String,
    pub lock_id: String,
    pub ttl_seconds: u32,
    /// Capacity applied only when this call creates the row (-1 for unlimited)
    pub max_shared_locks: i32,
}

impl Default for TrySLockParams {
    fn default() -> Self {
        Self {
            name: String::new(),
            lock_id: String::new(),
            ttl_seconds: 0,
            max_shared_locks: UNLIMITED_SHARED_LOCKS,
        }
    }
}

/// Parameters for a blocking shared acquisition
#[derive(Debug, Clone)]
pub struct SLockParams {
    pub name: String,
    pub lock_id: String,
    pub ttl_seconds: u32,
    pub max_shared_locks: i32,
    pub retry_interval: Option<Duration>,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelSignal>,
}

impl Default for SLockParams {
    fn default() -> Self {
        Self {
            name: String::new(),
            lock_id: String::new(),
            ttl_seconds: 0,
            max_shared_locks: UNLIMITED_SHARED_LOCKS,
            retry_interval: None,
            timeout: None,
            cancel: None,
        }
    }
}

/// Parameters for releasing either kind of claim
#[derive(Debug, Clone, Default)]
pub struct UnlockParams {
    pub name: String,
    pub lock_id: String,
}

/// Outcome of a try-operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TryLockResult {
    pub acquired: bool,
    /// Expiry of the new lease, present only when acquired
    pub expires_at: Option<DateTime<Utc>>,
}

impl TryLockResult {
    pub fn acquired(expires_at: DateTime<Utc>) -> Self {
        Self {
            acquired: true,
            expires_at: Some(expires_at),
        }
    }

    pub fn contended() -> Self {
        Self::default()
    }
}

/// Outcome of a blocking acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockResult {
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnlockResult {
    pub released: bool,
}

pub(crate) fn validate_target(name: &str, lock_id: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LockError::InvalidArgument("lock name must not be empty".to_string()));
    }
    if lock_id.is_empty() {
        return Err(LockError::InvalidArgument("lock id must not be empty".to_string()));
    }
    Ok(())
}

pub(crate) fn validate_capacity(max_shared_locks: i32) -> Result<()> {
    if max_shared_locks == UNLIMITED_SHARED_LOCKS || max_shared_locks > 0 {
        Ok(())
    } else {
        Err(LockError::InvalidArgument(format!(
            "max_shared_locks must be -1 or positive, got {}",
            max_shared_locks
        )))
    }
}
