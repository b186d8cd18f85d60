use std::future::Future;
use std::time::Duration;

use crate::registry::Registry;

/// Closes every player connection when the server is asked to stop.
///
/// [`close_all`](Self::close_all) drains the registry under its write lock
/// and marks it as shutting down in the same step. Every session present at
/// that moment is sent a close frame; any registration that reaches the
/// registry afterwards is refused, so nothing is left open behind the drain.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    registry: Registry,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

    pub fn new(registry: Registry) -> Self {
        Self::with_grace(registry, Self::DEFAULT_GRACE)
    }

    /// `grace` bounds how long [`close_all`](Self::close_all) waits for the
    /// session tasks to finish writing their close frames.
    pub fn with_grace(registry: Registry, grace: Duration) -> Self {
        Self { registry, grace }
    }

    /// Close every live session and wait for their tasks. Returns the number
    /// of sessions that were closed.
    pub async fn close_all(&self) -> usize {
        let drained = self.registry.drain();
        tracing::info!(clients = drained.len(), "closing all client connections");

        for (name, handle) in &drained {
            tracing::debug!(client = %name, "closing connection for client");
            handle.request_close();
        }

        let tasks = self.registry.tasks();
        tasks.close();
        if tokio::time::timeout(self.grace, tasks.wait()).await.is_err() {
            tracing::warn!(
                grace = ?self.grace,
                remaining = tasks.len(),
                "client sessions did not finish closing in time"
            );
        } else {
            tracing::info!("all client connections have been closed");
        }

        drained.len()
    }

    /// Wait for `signal`, then [`close_all`](Self::close_all).
    pub async fn run_until<S>(self, signal: S) -> usize
    where
        S: Future<Output = ()>,
    {
        signal.await;
        tracing::info!("interrupt received, closing all clients connection");
        self.close_all().await
    }
}

/// Resolves on Ctrl+C (SIGINT) or, on Unix, SIGTERM.
pub async fn interrupt() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
