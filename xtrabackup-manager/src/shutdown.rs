//! Signal handling for SIGTERM and SIGINT.
//!
//! A signal cancels the shared token, which kills the engine invocation in
//! flight. The run then fails with `ExternalToolFailed` and the run lock is
//! released on the way out.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled once a shutdown signal arrives
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel everything waiting on the token.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for shutdown signal (SIGTERM or SIGINT), then cancel the token
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), stopping the running engine...");
            }
            _ = terminate => {
                info!("Received SIGTERM, stopping the running engine...");
            }
        }

        self.cancel();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_coordinator() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.token();

        // Spawn a task that waits for the shutdown
        let handle = tokio::spawn(async move {
            token.cancelled().await;
        });

        // Simulate shutdown
        coordinator.cancel();

        // Task should complete
        handle.await.unwrap();
    }
}
