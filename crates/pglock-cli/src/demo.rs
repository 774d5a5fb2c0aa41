//! Demo workloads
//!
//! Each workload spawns tasks that acquire, hold and release locks while a
//! gauge records how many of them held the lock at the same time. The
//! resulting `ScenarioReport` makes the locking guarantees visible.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use pglock_core::{
    CancelSignal, LockClient, LockError, LockResult, SLockParams, UnlockParams, XLockParams,
};
use tracing::{info, warn};

use crate::cli::SlockDemoArgs;
use crate::shutdown::run_until_cancelled;

/// Durations used by the demo workloads
#[derive(Debug, Clone)]
pub struct DemoTiming {
    pub retry_interval: Duration,
    pub exclusive_hold: Duration,
    pub shared_hold: Duration,
    /// How long the first holder keeps the lock in the blocking scenarios
    pub release_after: Duration,
    /// How long the contender waits in the blocking scenarios
    pub contender_timeout: Duration,
}

impl Default for DemoTiming {
    fn default() -> Self {
        Self {
            retry_interval: pglock_core::DEFAULT_RETRY_INTERVAL,
            exclusive_hold: Duration::from_millis(500),
            shared_hold: Duration::from_secs(1),
            release_after: Duration::from_secs(1),
            contender_timeout: Duration::from_secs(2),
        }
    }
}

/// Which kind of lock a demo task takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Exclusive,
    Shared { max_shared_locks: i32 },
}

/// What happened to the task that had to wait for another holder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContenderOutcome {
    AcquiredAfterRelease,
    TimedOut,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    pub name: &'static str,
    pub acquired: usize,
    pub failed: usize,
    /// Largest number of tasks holding the lock at once
    pub peak_holders: usize,
    pub contender: Option<ContenderOutcome>,
}

#[derive(Default)]
struct HolderGauge {
    inside: AtomicUsize,
    peak: AtomicUsize,
}

impl HolderGauge {
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

struct Acquisition<'a> {
    name: &'a str,
    lock_id: &'a str,
    ttl_seconds: u32,
    kind: LockKind,
    retry_interval: Duration,
    timeout: Option<Duration>,
    cancel: &'a CancelSignal,
}

async fn acquire(
    client: &LockClient,
    request: Acquisition<'_>,
) -> pglock_core::Result<LockResult> {
    match request.kind {
        LockKind::Exclusive => {
            client
                .xlock(&XLockParams {
                    name: request.name.to_string(),
                    lock_id: request.lock_id.to_string(),
                    ttl_seconds: request.ttl_seconds,
                    retry_interval: Some(request.retry_interval),
                    timeout: request.timeout,
                    cancel: Some(request.cancel.clone()),
                })
                .await
        }
        LockKind::Shared { max_shared_locks } => {
            client
                .slock(&SLockParams {
                    name: request.name.to_string(),
                    lock_id: request.lock_id.to_string(),
                    ttl_seconds: request.ttl_seconds,
                    max_shared_locks,
                    retry_interval: Some(request.retry_interval),
                    timeout: request.timeout,
                    cancel: Some(request.cancel.clone()),
                })
                .await
        }
    }
}

async fn release(client: &LockClient, name: &str, lock_id: &str) {
    let params = UnlockParams {
        name: name.to_string(),
        lock_id: lock_id.to_string(),
    };
    match client.unlock(&params).await {
        Ok(result) if result.released => info!(name = %name, lock_id, "Lock released"),
        Ok(_) => warn!(name = %name, lock_id, "Lock was no longer held"),
        Err(e) => warn!(name = %name, lock_id, error = %e, "Failed to release lock"),
    }
}

/// Spawn `workers` tasks that each take the lock, hold it for `hold` and
/// release it
#[allow(clippy::too_many_arguments)]
async fn hold_group(
    client: &LockClient,
    scenario: &'static str,
    name: &'static str,
    id_prefix: &'static str,
    kind: LockKind,
    workers: usize,
    ttl_seconds: u32,
    hold: Duration,
    retry_interval: Duration,
    cancel: &CancelSignal,
) -> ScenarioReport {
    let gauge = Arc::new(HolderGauge::default());

    let tasks = (0..workers).map(|i| {
        let client = client.clone();
        let gauge = gauge.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let lock_id = format!("{}_{}", id_prefix, i);
            info!(scenario, worker = i, "Attempting to acquire lock...");

            let request = Acquisition {
                name,
                lock_id: &lock_id,
                ttl_seconds,
                kind,
                retry_interval,
                timeout: None,
                cancel: &cancel,
            };
            if let Err(e) = acquire(&client, request).await {
                warn!(scenario, worker = i, error = %e, "Failed to acquire lock");
                return false;
            }

            gauge.enter();
            info!(scenario, worker = i, "Lock acquired!");
            run_until_cancelled(tokio::time::sleep(hold), &cancel).await;
            gauge.leave();

            release(&client, name, &lock_id).await;
            true
        })
    });

    let mut acquired = 0;
    let mut failed = 0;
    for outcome in join_all(tasks).await {
        match outcome {
            Ok(true) => acquired += 1,
            Ok(false) => failed += 1,
            Err(e) => {
                warn!(scenario, error = %e, "Worker task failed");
                failed += 1;
            }
        }
    }

    ScenarioReport {
        name: scenario,
        acquired,
        failed,
        peak_holders: gauge.peak(),
        contender: None,
    }
}

/// Take the `holder` lock, start a `contender` that waits with a timeout, then
/// release the first lock while the contender is still waiting
async fn blocking_pair(
    client: &LockClient,
    scenario: &'static str,
    name: &'static str,
    holder: (&'static str, LockKind),
    contender: (&'static str, LockKind),
    timing: &DemoTiming,
    cancel: &CancelSignal,
) -> pglock_core::Result<ScenarioReport> {
    let gauge = Arc::new(HolderGauge::default());
    let (holder_id, holder_kind) = holder;
    let (contender_id, contender_kind) = contender;

    info!(scenario, lock_id = holder_id, "Acquiring first lock...");
    acquire(
        client,
        Acquisition {
            name,
            lock_id: holder_id,
            ttl_seconds: 30,
            kind: holder_kind,
            retry_interval: timing.retry_interval,
            timeout: None,
            cancel,
        },
    )
    .await?;
    gauge.enter();
    info!(scenario, lock_id = holder_id, "First lock acquired");

    let waiter = {
        let client = client.clone();
        let gauge = gauge.clone();
        let cancel = cancel.clone();
        let retry_interval = timing.retry_interval;
        let timeout = timing.contender_timeout;
        tokio::spawn(async move {
            info!(scenario, lock_id = contender_id, "Contender waiting for the lock...");
            let request = Acquisition {
                name,
                lock_id: contender_id,
                ttl_seconds: 30,
                kind: contender_kind,
                retry_interval,
                timeout: Some(timeout),
                cancel: &cancel,
            };
            match acquire(&client, request).await {
                Ok(_) => {
                    gauge.enter();
                    info!(scenario, lock_id = contender_id, "Contender acquired the lock");
                    gauge.leave();
                    release(&client, name, contender_id).await;
                    ContenderOutcome::AcquiredAfterRelease
                }
                Err(LockError::DeadlineExceeded) => {
                    info!(scenario, lock_id = contender_id, "Contender timed out");
                    ContenderOutcome::TimedOut
                }
                Err(e) => {
                    warn!(scenario, lock_id = contender_id, error = %e, "Contender failed");
                    ContenderOutcome::Failed(e.to_string())
                }
            }
        })
    };

    run_until_cancelled(tokio::time::sleep(timing.release_after), cancel).await;
    info!(scenario, lock_id = holder_id, "Releasing first lock...");
    gauge.leave();
    release(client, name, holder_id).await;

    let outcome = waiter
        .await
        .unwrap_or_else(|e| ContenderOutcome::Failed(e.to_string()));
    let acquired = 1 + usize::from(outcome == ContenderOutcome::AcquiredAfterRelease);

    Ok(ScenarioReport {
        name: scenario,
        acquired,
        failed: 2 - acquired,
        peak_holders: gauge.peak(),
        contender: Some(outcome),
    })
}

/// Workers contending for one bounded shared lock
pub async fn run_slock_demo(
    client: &LockClient,
    args: &SlockDemoArgs,
    retry_interval: Duration,
    cancel: &CancelSignal,
) -> ScenarioReport {
    hold_group(
        client,
        "slock",
        "test_lock",
        "test_lock",
        LockKind::Shared {
            max_shared_locks: args.max_shared,
        },
        args.workers,
        args.ttl,
        Duration::from_millis(args.hold_ms),
        retry_interval,
        cancel,
    )
    .await
}

/// Run the five locking scenarios in order, stopping early on cancellation
pub async fn run_scenarios(
    client: &LockClient,
    timing: &DemoTiming,
    cancel: &CancelSignal,
) -> pglock_core::Result<Vec<ScenarioReport>> {
    let mut reports = Vec::with_capacity(5);

    info!("=== Scenario 1: exclusive locks serialize holders ===");
    reports.push(
        hold_group(
            client,
            "exclusive_serialization",
            "test_xlock",
            "xlock",
            LockKind::Exclusive,
            3,
            60,
            timing.exclusive_hold,
            timing.retry_interval,
            cancel,
        )
        .await,
    );

    if cancel.is_cancelled() {
        return Ok(reports);
    }
    info!("=== Scenario 2: unlimited shared locks are held together ===");
    reports.push(
        hold_group(
            client,
            "unlimited_shared",
            "test_unlimited_slock",
            "reader",
            LockKind::Shared {
                max_shared_locks: -1,
            },
            5,
            30,
            timing.shared_hold,
            timing.retry_interval,
            cancel,
        )
        .await,
    );

    if cancel.is_cancelled() {
        return Ok(reports);
    }
    info!("=== Scenario 3: shared locks limited to 3 holders ===");
    reports.push(
        hold_group(
            client,
            "limited_shared",
            "test_limited_slock",
            "reader",
            LockKind::Shared {
                max_shared_locks: 3,
            },
            5,
            30,
            timing.shared_hold,
            timing.retry_interval,
            cancel,
        )
        .await,
    );

    if cancel.is_cancelled() {
        return Ok(reports);
    }
    info!("=== Scenario 4: a shared lock blocks an exclusive lock ===");
    reports.push(
        blocking_pair(
            client,
            "shared_blocks_exclusive",
            "test_slock_blocks_xlock",
            (
                "reader_1",
                LockKind::Shared {
                    max_shared_locks: -1,
                },
            ),
            ("writer_1", LockKind::Exclusive),
            timing,
            cancel,
        )
        .await?,
    );

    if cancel.is_cancelled() {
        return Ok(reports);
    }
    info!("=== Scenario 5: an exclusive lock blocks a shared lock ===");
    reports.push(
        blocking_pair(
            client,
            "exclusive_blocks_shared",
            "test_xlock_blocks_slock",
            ("writer_1", LockKind::Exclusive),
            (
                "reader_1",
                LockKind::Shared {
                    max_shared_locks: -1,
                },
            ),
            timing,
            cancel,
        )
        .await?,
    );

    Ok(reports)
}
