use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Graceful shutdown coordinator.
///
/// Broadcasts one `CancellationToken` to the sweep task and anything else
/// that runs until the process is told to stop.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Returns a clone of the cancellation token for use by tasks.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn trigger_shutdown(&self) {
        info!("shutdown signal received, broadcasting to all tasks");
        self.token.cancel();
    }

    /// Wait for SIGINT or SIGTERM, then trigger shutdown.
    pub async fn wait_for_signal_and_shutdown(&self) {
        let ctrl_c = tokio::signal::ctrl_c();

        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {
                        info!("received SIGINT (Ctrl+C)");
                    }
                    _ = sigterm.recv() => {
                        info!("received SIGTERM");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler, waiting for SIGINT only");
                if let Err(e) = ctrl_c.await {
                    warn!(error = %e, "failed to listen for SIGINT");
                }
            }
        }

        self.trigger_shutdown();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Seconds background tasks get to finish after shutdown is triggered.
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;
