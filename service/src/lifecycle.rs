//! Shutdown coordination for the server and consumer processes.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Wait for Ctrl+C or SIGTERM.
///
/// A signal handler that cannot be installed is logged and never fires; the
/// other one still does.
pub async fn shutdown_signal() {
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
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, starting graceful shutdown"),
        () = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}

/// How a background task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskExit {
    /// Returned normally
    Stopped,
    /// Panicked or was cancelled
    Failed,
    /// Still running at the deadline; it has been aborted
    TimedOut,
}

/// Wait up to `timeout` for a task, aborting it if it does not finish.
pub async fn await_task(name: &str, handle: JoinHandle<()>, timeout: Duration) -> TaskExit {
    let abort = handle.abort_handle();
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(())) => {
            info!(task = name, "Task stopped gracefully");
            TaskExit::Stopped
        },
        Ok(Err(e)) => {
            warn!(task = name, error = %e, "Task failed");
            TaskExit::Failed
        },
        Err(_) => {
            warn!(task = name, "Task shutdown timed out");
            abort.abort();
            TaskExit::TimedOut
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finished_task_is_stopped() {
        let handle = tokio::spawn(async {});
        assert_eq!(
            await_task("noop", handle, Duration::from_secs(1)).await,
            TaskExit::Stopped
        );
    }

    #[tokio::test]
    async fn panicking_task_is_failed() {
        #[allow(clippy::panic)]
        let handle = tokio::spawn(async { panic!("boom") });
        assert_eq!(
            await_task("panics", handle, Duration::from_secs(1)).await,
            TaskExit::Failed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_task_times_out() {
        let handle = tokio::spawn(std::future::pending::<()>());
        assert_eq!(
            await_task("stuck", handle, Duration::from_millis(50)).await,
            TaskExit::TimedOut
        );
    }
}
