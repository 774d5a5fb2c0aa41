//! Ctrl+C / SIGTERM handling
//!
//! A termination signal cancels every blocking lock call that was given the
//! returned `CancelSignal`.

use pglock_core::CancelSignal;
use tracing::{info, warn};

/// Spawn a listener that cancels the returned signal on Ctrl+C or SIGTERM
pub fn cancel_on_shutdown_signal() -> CancelSignal {
    let cancel = CancelSignal::new();
    let cancel_clone = cancel.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, cancelling pending lock waits...");
            }
            _ = terminate => {
                info!("Received SIGTERM, cancelling pending lock waits...");
            }
        }

        cancel_clone.cancel();
    });

    cancel
}

/// Run `future` unless `cancel` fires first
pub async fn run_until_cancelled<F, T>(future: F, cancel: &CancelSignal) -> Option<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        result = future => Some(result),
        _ = cancel.cancelled() => {
            warn!("Cancellation requested, abandoning operation");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_listener_leaves_signal_untriggered() {
        let cancel = cancel_on_shutdown_signal();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_until_cancelled_completes() {
        let cancel = CancelSignal::new();
        let result = run_until_cancelled(async { 42 }, &cancel).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn test_run_until_cancelled_aborts() {
        let cancel = CancelSignal::new();
        cancel.cancel();
        let result = run_until_cancelled(std::future::pending::<u32>(), &cancel).await;
        assert_eq!(result, None);
    }
}
