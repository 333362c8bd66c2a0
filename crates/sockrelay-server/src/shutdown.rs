//! Graceful shutdown coordination via `CancellationToken`.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::session::{CloseReason, SessionRegistry};

/// What a graceful shutdown managed to do before its deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Sessions drained with [`CloseReason::Shutdown`].
    pub drained: usize,
    /// Whether every session unregistered and the listener exited in time.
    pub clean: bool,
}

/// Coordinates the listener and live sessions during shutdown.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    registry: Arc<SessionRegistry>,
}

impl ShutdownCoordinator {
    /// Create a coordinator over `registry`.
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            token: CancellationToken::new(),
            registry,
        }
    }

    /// Token cancelled when shutdown begins. The listener and the upgrade
    /// handler both watch it.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Shut down within `timeout`.
    ///
    /// 1. Cancel the token (stop accepting connections and upgrades)
    /// 2. Drain every session with [`CloseReason::Shutdown`]
    /// 3. Wait for the registry to empty, then for the listener task
    /// 4. Abort the listener if the deadline passes
    pub async fn graceful_shutdown(&self, server: JoinHandle<()>, timeout: Duration) -> ShutdownReport {
        let deadline = Instant::now() + timeout;

        self.token.cancel();
        let drained = self.registry.drain_all(CloseReason::Shutdown);
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        info!(drained, timeout_ms, "shutting down");

        let sessions_closed = timeout_at(deadline, self.registry.wait_empty()).await.is_ok();
        if !sessions_closed {
            warn!(remaining = self.registry.count(), "sessions still open at shutdown deadline");
        }

        let abort = server.abort_handle();
        let server_stopped = timeout_at(deadline, server).await.is_ok();
        if !server_stopped {
            warn!("listener did not stop within {timeout:?}, aborting");
            abort.abort();
        }

        ShutdownReport {
            drained,
            clean: sessions_closed && server_stopped,
        }
    }
}
