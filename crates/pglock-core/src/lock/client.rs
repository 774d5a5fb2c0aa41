//! Lock client: try, blocking and release operations
//!
//! Every operation first tries to create the row (first claimant wins
//! immediately), then falls back to a row-locked read/check/write through
//! [`LockStore::update_locked`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::model::*;
use super::retry::{WaitPolicy, retry_until_acquired};
use super::store::LockStore;
use crate::error::Result;

/// Client for lease-based exclusive and shared locks
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct LockClient {
    store: Arc<dyn LockStore>,
}

impl std::fmt::Debug for LockClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockClient").finish_non_exhaustive()
    }
}

impl LockClient {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LockStore> {
        &self.store
    }

    /// Try to acquire an exclusive lock without waiting.
    ///
    /// Fails while any valid exclusive or shared claim exists, including an
    /// exclusive claim held by the same `lock_id`: a holder extends its lease
    /// before expiry, it does not re-acquire.
    pub async fn try_xlock(&self, params: &TryXLockParams) -> Result<TryLockResult> {
        validate_target(&params.name, &params.lock_id)?;

        let expires_at = lease_expiry(Utc::now(), params.ttl_seconds);
        let seed = LockRow::with_exclusive(&params.name, &params.lock_id, expires_at);
        if self.store.insert_if_absent(&seed).await? {
            debug!(
                name = %params.name,
                lock_id = %params.lock_id,
                %expires_at,
                "XLock acquired on new row"
            );
            return Ok(TryLockResult::acquired(expires_at));
        }

        let mut granted: Option<DateTime<Utc>> = None;
        let ttl_seconds = params.ttl_seconds;
        let lock_id = params.lock_id.as_str();

        let found = self
            .store
            .update_locked(&params.name, &mut |row: &mut LockRow| {
                let now = Utc::now();
                let expires_at = lease_expiry(now, ttl_seconds);
                let acquired = row.claim_exclusive(lock_id, expires_at, now);
                granted = acquired.then_some(expires_at);
                acquired
            })
            .await?;

        Ok(self.finish_attempt("XLock", &params.name, lock_id, found, granted))
    }

    /// Acquire an exclusive lock, polling until it is granted or the caller
    /// gives up through `cancel` or `timeout`.
    pub async fn xlock(&self, params: &XLockParams) -> Result<LockResult> {
        let attempt = TryXLockParams {
            name: params.name.clone(),
            lock_id: params.lock_id.clone(),
            ttl_seconds: params.ttl_seconds,
        };
        let policy = WaitPolicy {
            retry_interval: params.retry_interval,
            timeout: params.timeout,
            cancel: params.cancel.clone(),
        };

        let expires_at = retry_until_acquired(&policy, || self.try_xlock(&attempt)).await?;
        Ok(LockResult { expires_at })
    }

    /// Try to acquire or renew a shared lock without waiting.
    ///
    /// `max_shared_locks` only takes effect when this call creates the row;
    /// afterwards the capacity stored with the row applies.
    pub async fn try_slock(&self, params: &TrySLockParams) -> Result<TryLockResult> {
        validate_target(&params.name, &params.lock_id)?;
        validate_capacity(params.max_shared_locks)?;

        let expires_at = lease_expiry(Utc::now(), params.ttl_seconds);
        let seed = LockRow::with_shared(
            &params.name,
            &params.lock_id,
            expires_at,
            params.max_shared_locks,
        );
        if self.store.insert_if_absent(&seed).await? {
            debug!(
                name = %params.name,
                lock_id = %params.lock_id,
                max_shared_locks = params.max_shared_locks,
                %expires_at,
                "SLock acquired on new row"
            );
            return Ok(TryLockResult::acquired(expires_at));
        }

        let mut granted: Option<DateTime<Utc>> = None;
        let ttl_seconds = params.ttl_seconds;
        let lock_id = params.lock_id.as_str();

        let found = self
            .store
            .update_locked(&params.name, &mut |row: &mut LockRow| {
                let now = Utc::now();
                let expires_at = lease_expiry(now, ttl_seconds);
                let acquired = row.claim_shared(lock_id, expires_at, now);
                granted = acquired.then_some(expires_at);
                acquired
            })
            .await?;

        Ok(self.finish_attempt("SLock", &params.name, lock_id, found, granted))
    }

    /// Acquire a shared lock, polling like [`LockClient::xlock`]
    pub async fn slock(&self, params: &SLockParams) -> Result<LockResult> {
        let attempt = TrySLockParams {
            name: params.name.clone(),
            lock_id: params.lock_id.clone(),
            ttl_seconds: params.ttl_seconds,
            max_shared_locks: params.max_shared_locks,
        };
        let policy = WaitPolicy {
            retry_interval: params.retry_interval,
            timeout: params.timeout,
            cancel: params.cancel.clone(),
        };

        let expires_at = retry_until_acquired(&policy, || self.try_slock(&attempt)).await?;
        Ok(LockResult { expires_at })
    }

    /// Release every claim `lock_id` holds on `name`, expired or not.
    ///
    /// A missing row or a caller holding nothing yields `released = false`.
    pub async fn unlock(&self, params: &UnlockParams) -> Result<UnlockResult> {
        validate_target(&params.name, &params.lock_id)?;

        let lock_id = params.lock_id.as_str();
        let written = self
            .store
            .update_locked(&params.name, &mut |row: &mut LockRow| row.release(lock_id))
            .await?;

        let released = written.unwrap_or(false);
        debug!(name = %params.name, lock_id = %lock_id, released, "Unlock processed");

        Ok(UnlockResult { released })
    }

    /// Current valid holders of `name`, or `None` if the lock was never used
    pub async fn inspect(&self, name: &str) -> Result<Option<LockSnapshot>> {
        let row = self.store.load(name).await?;
        Ok(row.map(|row| row.snapshot(Utc::now())))
    }

    fn finish_attempt(
        &self,
        kind: &str,
        name: &str,
        lock_id: &str,
        found: Option<bool>,
        granted: Option<DateTime<Utc>>,
    ) -> TryLockResult {
        match (found, granted) {
            (Some(true), Some(expires_at)) => {
                debug!(kind, name = %name, lock_id = %lock_id, %expires_at, "Lock acquired");
                TryLockResult::acquired(expires_at)
            }
            (None, _) => {
                // Rows are never deleted by this client; someone removed it
                // between the insert and the locked read. The next attempt
                // recreates it.
                warn!(
                    kind,
                    name = %name,
                    lock_id = %lock_id,
                    "Lock row vanished during acquisition"
                );
                TryLockResult::contended()
            }
            _ => {
                debug!(kind, name = %name, lock_id = %lock_id, "Lock busy");
                TryLockResult::contended()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CancelSignal;
    use crate::error::LockError;
    use crate::lock::MemoryLockStore;
    use std::time::{Duration, Instant};

    fn client() -> LockClient {
        LockClient::new(Arc::new(MemoryLockStore::new()))
    }

    fn try_x(name: &str, lock_id: &str, ttl_seconds: u32) -> TryXLockParams {
        TryXLockParams {
            name: name.to_string(),
            lock_id: lock_id.to_string(),
            ttl_seconds,
        }
    }

    fn try_s(name: &str, lock_id: &str, ttl_seconds: u32, max_shared_locks: i32) -> TrySLockParams {
        TrySLockParams {
            name: name.to_string(),
            lock_id: lock_id.to_string(),
            ttl_seconds,
            max_shared_locks,
        }
    }

    fn unlock(name: &str, lock_id: &str) -> UnlockParams {
        UnlockParams {
            name: name.to_string(),
            lock_id: lock_id.to_string(),
        }
    }

    #[test]
    fn test_debug_hides_store() {
        assert_eq!(format!("{:?}", client()), "LockClient { .. }");
    }

    #[tokio::test]
    async fn test_xlock_handoff_after_unlock() {
        let client = client();

        let first = client.try_xlock(&try_x("R", "x", 30)).await.unwrap();
        assert!(first.acquired);
        assert!(first.expires_at.unwrap() > Utc::now());

        let second = client.try_xlock(&try_x("R", "y", 30)).await.unwrap();
        assert!(!second.acquired);
        assert_eq!(second.expires_at, None);

        assert!(client.unlock(&unlock("R", "x")).await.unwrap().released);
        assert!(client.try_xlock(&try_x("R", "y", 30)).await.unwrap().acquired);
    }

    #[tokio::test]
    async fn test_exclusive_and_shared_block_each_other() {
        let client = client();

        assert!(client.try_xlock(&try_x("A", "w", 30)).await.unwrap().acquired);
        let started = Instant::now();
        assert!(!client.try_slock(&try_s("A", "r", 30, -1)).await.unwrap().acquired);
        assert!(started.elapsed() < Duration::from_millis(100));

        assert!(client.try_slock(&try_s("B", "r", 30, -1)).await.unwrap().acquired);
        assert!(!client.try_xlock(&try_x("B", "w", 30)).await.unwrap().acquired);
    }

    #[tokio::test]
    async fn test_lease_expiry_frees_lock() {
        let client = client();

        assert!(client.try_xlock(&try_x("E", "x", 1)).await.unwrap().acquired);
        assert!(!client.try_xlock(&try_x("E", "y", 1)).await.unwrap().acquired);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(client.try_xlock(&try_x("E", "y", 30)).await.unwrap().acquired);
    }

    #[tokio::test]
    async fn test_shared_renewal_extends_without_using_capacity() {
        let client = client();

        let first = client.try_slock(&try_s("S", "a", 10, 1)).await.unwrap();
        assert!(first.acquired);
        assert!(!client.try_slock(&try_s("S", "b", 10, 1)).await.unwrap().acquired);

        let renewed = client.try_slock(&try_s("S", "a", 60, 1)).await.unwrap();
        assert!(renewed.acquired);
        assert!(renewed.expires_at.unwrap() > first.expires_at.unwrap());

        let snapshot = client.inspect("S").await.unwrap().unwrap();
        assert_eq!(snapshot.holders(), vec!["a"]);
        assert_eq!(snapshot.shared[0].expires_at, renewed.expires_at.unwrap());
    }

    #[tokio::test]
    async fn test_capacity_is_fixed_at_row_creation() {
        let client = client();

        assert!(client.try_slock(&try_s("C", "a", 30, 1)).await.unwrap().acquired);
        // A larger capacity supplied later is ignored
        assert!(!client.try_slock(&try_s("C", "b", 30, 5)).await.unwrap().acquired);

        // A row created by an exclusive claimant is unlimited
        assert!(client.try_xlock(&try_x("D", "w", 0)).await.unwrap().acquired);
        for reader in ["a", "b", "c"] {
            assert!(client.try_slock(&try_s("D", reader, 30, 1)).await.unwrap().acquired);
        }
        assert_eq!(client.inspect("D").await.unwrap().unwrap().max_shared_locks, -1);
    }

    #[tokio::test]
    async fn test_unlock_cases() {
        let client = client();

        assert!(!client.unlock(&unlock("missing", "x")).await.unwrap().released);

        assert!(client.try_xlock(&try_x("U", "x", 0)).await.unwrap().acquired);
        // Expired claims are still released by their holder
        assert!(client.unlock(&unlock("U", "x")).await.unwrap().released);
        assert!(!client.unlock(&unlock("U", "x")).await.unwrap().released);
        assert!(!client.unlock(&unlock("U", "stranger")).await.unwrap().released);

        let snapshot = client.inspect("U").await.unwrap().unwrap();
        assert!(snapshot.is_free());
        assert_eq!(snapshot.stale_entries, 0);
    }

    #[tokio::test]
    async fn test_rejects_invalid_arguments() {
        let client = client();

        let err = client.try_xlock(&try_x("", "x", 1)).await.unwrap_err();
        assert!(matches!(err, LockError::InvalidArgument(_)));
        let err = client.try_slock(&try_s("n", "x", 1, 0)).await.unwrap_err();
        assert!(matches!(err, LockError::InvalidArgument(_)));
        let err = client.unlock(&unlock("n", "")).await.unwrap_err();
        assert!(matches!(err, LockError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_blocking_xlock_waits_for_release() {
        let client = client();
        assert!(client.try_xlock(&try_x("W", "first", 30)).await.unwrap().acquired);

        let releaser = {
            let client = client.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                client.unlock(&unlock("W", "first")).await.unwrap()
            })
        };

        let result = client
            .xlock(&XLockParams {
                name: "W".to_string(),
                lock_id: "second".to_string(),
                ttl_seconds: 30,
                retry_interval: Some(Duration::from_millis(10)),
                timeout: Some(Duration::from_secs(5)),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(releaser.await.unwrap().released);
        assert!(result.expires_at > Utc::now());
        let snapshot = client.inspect("W").await.unwrap().unwrap();
        assert_eq!(snapshot.exclusive.unwrap().lock_id, "second");
    }

    #[tokio::test]
    async fn test_blocking_slock_times_out_behind_xlock() {
        let client = client();
        assert!(client.try_xlock(&try_x("T", "writer", 30)).await.unwrap().acquired);

        let err = client
            .slock(&SLockParams {
                name: "T".to_string(),
                lock_id: "reader".to_string(),
                ttl_seconds: 30,
                retry_interval: Some(Duration::from_millis(10)),
                timeout: Some(Duration::from_millis(80)),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::DeadlineExceeded));

        // The failed wait left nothing behind
        let snapshot = client.inspect("T").await.unwrap().unwrap();
        assert_eq!(snapshot.holders(), vec!["writer"]);
    }

    #[tokio::test]
    async fn test_cancelled_xlock_leaves_no_claim() {
        let client = client();
        assert!(client.try_xlock(&try_x("K", "holder", 30)).await.unwrap().acquired);

        let cancel = CancelSignal::new();
        let waiter = {
            let client = client.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                client
                    .xlock(&XLockParams {
                        name: "K".to_string(),
                        lock_id: "waiter".to_string(),
                        ttl_seconds: 30,
                        retry_interval: Some(Duration::from_millis(10)),
                        cancel: Some(cancel),
                        ..Default::default()
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(40)).await;
        cancel.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, LockError::Cancelled));
        assert!(!client.unlock(&unlock("K", "waiter")).await.unwrap().released);
    }
}
