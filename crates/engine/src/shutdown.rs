//! Shutdown signalling for the polling loop.
//!
//! The orchestrator watches a `watch::Receiver<bool>`; flipping it to `true`
//! ends the loop after the in-flight cycle.

use tokio::sync::watch;
use tracing::{info, warn};

/// Sender/receiver pair starting in the "running" state.
pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Spawn a task that flips the returned receiver on SIGINT or SIGTERM.
pub fn on_os_signal() -> watch::Receiver<bool> {
    let (tx, rx) = channel();
    tokio::spawn(async move {
        os_signal().await;
        info!("shutdown signal received");
        let _ = tx.send(true);
    });
    rx
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C (cross-platform fallback).
async fn os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "cannot register unix signal handlers, falling back to ctrl_c");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl_c; shutdown only via process kill");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_starts_running() {
        let (tx, mut rx) = channel();
        assert!(!*rx.borrow());
        tx.send(true).unwrap();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
