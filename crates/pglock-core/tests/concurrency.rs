//! Concurrent lock behavior against the in-memory store
//!
//! Every task shares one `LockClient`; overlap is detected with an atomic
//! "currently inside" counter updated right after acquisition and right
//! before release.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use pglock_core::{
    LockClient, MemoryLockStore, SLockParams, TrySLockParams, TryXLockParams, UnlockParams,
    XLockParams,
};

struct Occupancy {
    inside: AtomicUsize,
    peak: AtomicUsize,
}

impl Occupancy {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inside: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn enter(&self) {
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.inside.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

fn memory_client() -> LockClient {
    LockClient::new(Arc::new(MemoryLockStore::new()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_xlock_holders_never_overlap() {
    let client = memory_client();
    let occupancy = Occupancy::new();
    let acquired = Arc::new(AtomicUsize::new(0));

    let tasks = (0..3).map(|i| {
        let client = client.clone();
        let occupancy = occupancy.clone();
        let acquired = acquired.clone();
        tokio::spawn(async move {
            let lock_id = format!("w{}", i);
            client
                .xlock(&XLockParams {
                    name: "R".to_string(),
                    lock_id: lock_id.clone(),
                    ttl_seconds: 60,
                    retry_interval: Some(Duration::from_millis(10)),
                    ..Default::default()
                })
                .await
                .expect("xlock should eventually succeed");

            occupancy.enter();
            acquired.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            occupancy.leave();

            client
                .unlock(&UnlockParams {
                    name: "R".to_string(),
                    lock_id,
                })
                .await
                .expect("unlock should succeed")
        })
    });

    let results = join_all(tasks).await;
    for result in results {
        assert!(result.unwrap().released);
    }

    assert_eq!(acquired.load(Ordering::SeqCst), 3);
    assert_eq!(occupancy.peak(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slock_respects_capacity() {
    let client = memory_client();
    let occupancy = Occupancy::new();
    let capacity = 2;

    let tasks = (0..5).map(|i| {
        let client = client.clone();
        let occupancy = occupancy.clone();
        tokio::spawn(async move {
            let lock_id = format!("reader_{}", i);
            client
                .slock(&SLockParams {
                    name: "limited".to_string(),
                    lock_id: lock_id.clone(),
                    ttl_seconds: 30,
                    max_shared_locks: capacity,
                    retry_interval: Some(Duration::from_millis(10)),
                    ..Default::default()
                })
                .await
                .expect("slock should eventually succeed");

            occupancy.enter();
            tokio::time::sleep(Duration::from_millis(60)).await;
            occupancy.leave();

            client
                .unlock(&UnlockParams {
                    name: "limited".to_string(),
                    lock_id,
                })
                .await
                .expect("unlock should succeed")
        })
    });

    for result in join_all(tasks).await {
        assert!(result.unwrap().released);
    }

    assert!(occupancy.peak() <= capacity as usize);
    assert!(client.inspect("limited").await.unwrap().unwrap().is_free());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unlimited_slock_holders_share() {
    let client = memory_client();

    let tasks = (0..5).map(|i| {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .try_slock(&TrySLockParams {
                    name: "unlimited".to_string(),
                    lock_id: format!("reader_{}", i),
                    ttl_seconds: 30,
                    max_shared_locks: -1,
                })
                .await
                .unwrap()
        })
    });

    for result in join_all(tasks).await {
        assert!(result.unwrap().acquired);
    }

    let snapshot = client.inspect("unlimited").await.unwrap().unwrap();
    assert_eq!(snapshot.shared.len(), 5);
}

#[tokio::test]
async fn test_extra_reader_admitted_after_release() {
    let client = memory_client();
    let slot = |lock_id: &str| TrySLockParams {
        name: "pool".to_string(),
        lock_id: lock_id.to_string(),
        ttl_seconds: 30,
        max_shared_locks: 2,
    };

    assert!(client.try_slock(&slot("a")).await.unwrap().acquired);
    assert!(client.try_slock(&slot("b")).await.unwrap().acquired);
    assert!(!client.try_slock(&slot("c")).await.unwrap().acquired);

    client
        .unlock(&UnlockParams {
            name: "pool".to_string(),
            lock_id: "a".to_string(),
        })
        .await
        .unwrap();

    assert!(client.try_slock(&slot("c")).await.unwrap().acquired);
}

#[tokio::test]
async fn test_extra_reader_admitted_after_expiry() {
    let client = memory_client();

    assert!(
        client
            .try_slock(&TrySLockParams {
                name: "leases".to_string(),
                lock_id: "short".to_string(),
                ttl_seconds: 1,
                max_shared_locks: 1,
            })
            .await
            .unwrap()
            .acquired
    );

    let started = Instant::now();
    let result = client
        .slock(&SLockParams {
            name: "leases".to_string(),
            lock_id: "patient".to_string(),
            ttl_seconds: 30,
            max_shared_locks: 1,
            retry_interval: Some(Duration::from_millis(50)),
            timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(500));
    let snapshot = client.inspect("leases").await.unwrap().unwrap();
    assert_eq!(snapshot.holders(), vec!["patient"]);
    assert_eq!(snapshot.shared[0].expires_at, result.expires_at);
    // The expired entry was dropped when the row was rewritten
    assert_eq!(snapshot.stale_entries, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_try_operations_return_promptly_under_contention() {
    let client = memory_client();
    assert!(
        client
            .try_xlock(&TryXLockParams {
                name: "busy".to_string(),
                lock_id: "owner".to_string(),
                ttl_seconds: 60,
            })
            .await
            .unwrap()
            .acquired
    );

    let tasks = (0..16).map(|i| {
        let client = client.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = if i % 2 == 0 {
                client
                    .try_xlock(&TryXLockParams {
                        name: "busy".to_string(),
                        lock_id: format!("x{}", i),
                        ttl_seconds: 60,
                    })
                    .await
            } else {
                client
                    .try_slock(&TrySLockParams {
                        name: "busy".to_string(),
                        lock_id: format!("s{}", i),
                        ttl_seconds: 60,
                        max_shared_locks: -1,
                    })
                    .await
            };
            (result.unwrap().acquired, started.elapsed())
        })
    });

    for result in join_all(tasks).await {
        let (acquired, elapsed) = result.unwrap();
        assert!(!acquired);
        assert!(elapsed < Duration::from_millis(100));
    }
}
