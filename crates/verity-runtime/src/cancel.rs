//! Cooperative cancellation of a run.
//!
//! A [`CancelSignal`] is tripped by SIGINT/SIGTERM or programmatically. The
//! orchestrator stops scheduling new questions and aborts in-flight solves;
//! only fully completed outcomes are kept.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Shared cancellation flag with async notification.
#[derive(Clone, Default)]
pub struct CancelSignal {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        let was_requested = self.requested.swap(true, Ordering::SeqCst);
        if !was_requested {
            info!("Cancellation requested");
            self.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation is requested.
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        // Checked after registering so a concurrent cancel is not missed
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Trip the signal on SIGINT/SIGTERM (Ctrl+C on non-Unix targets).
    pub fn listen_for_signals(&self) {
        let signal_handle = self.clone();

        tokio::spawn(async move {
            #[cfg(unix)]
            {
                let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate())
                {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("Failed to create SIGTERM handler: {}", e);
                        signal::ctrl_c().await.ok();
                        signal_handle.cancel();
                        return;
                    }
                };

                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, cancelling run");
                    }
                    _ = signal::ctrl_c() => {
                        info!("Received SIGINT, cancelling run");
                    }
                }
            }

            #[cfg(not(unix))]
            {
                if let Err(e) = signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                    return;
                }
                info!("Received Ctrl+C, cancelling run");
            }

            signal_handle.cancel();
        });
    }
}
