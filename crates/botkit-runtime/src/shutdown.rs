//! Shutdown requests and process signals.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cloneable handle for requesting a graceful shutdown of a running bot.
///
/// Each successful start arms a fresh token, so a request made during one
/// run does not leak into the next.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    token: Arc<Mutex<CancellationToken>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the runtime to stop. Returns immediately.
    pub fn request(&self) {
        self.token.lock().cancel();
    }

    pub fn is_requested(&self) -> bool {
        self.token.lock().is_cancelled()
    }

    /// Token for the current run.
    pub(crate) fn token(&self) -> CancellationToken {
        self.token.lock().clone()
    }

    /// Locks the current token so a caller can check-and-replace it atomically.
    pub(crate) fn lock(&self) -> MutexGuard<'_, CancellationToken> {
        self.token.lock()
    }

    /// Replaces a spent token.
    pub(crate) fn rearm(token: &mut CancellationToken) {
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }
}

/// Installs Ctrl+C and SIGTERM listeners and returns a future that completes
/// on the first of them.
///
/// The listeners are registered before this returns, so a signal that
/// arrives before the future is first polled is not lost. A listener that
/// cannot be installed is skipped with a warning.
#[cfg(unix)]
pub fn shutdown_signal() -> impl Future<Output = ()> + Send + 'static {
    use signal::unix::{SignalKind, signal};

    let interrupt = signal(SignalKind::interrupt())
        .inspect_err(|e| warn!(error = %e, "Failed to register Ctrl+C handler"))
        .ok();
    let terminate = signal(SignalKind::terminate())
        .inspect_err(|e| warn!(error = %e, "Failed to register SIGTERM handler"))
        .ok();

    async move {
        match (interrupt, terminate) {
            (Some(mut interrupt), Some(mut terminate)) => {
                tokio::select! {
                    _ = interrupt.recv() => info!("Received Ctrl+C, shutting down"),
                    _ = terminate.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            (Some(mut interrupt), None) => {
                interrupt.recv().await;
                info!("Received Ctrl+C, shutting down");
            }
            (None, Some(mut terminate)) => {
                terminate.recv().await;
                info!("Received SIGTERM, shutting down");
            }
            (None, None) => {
                warn!("No signal handlers installed, waiting for a shutdown request");
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Returns a future that completes on Ctrl+C.
#[cfg(not(unix))]
pub fn shutdown_signal() -> impl Future<Output = ()> + Send + 'static {
    async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                warn!(error = %e, "Failed to listen for Ctrl+C, waiting for a shutdown request");
                std::future::pending::<()>().await;
            }
        }
    }
}
