//! Process-wide shutdown signal: SIGINT/SIGTERM triggers a broadcast every
//! chain watcher and the health server select on.
//!
//! Grounded on `autopilot::shutdown_controller::ShutdownController`'s signal
//! handling; rebuilt on `tokio::sync::watch` rather than a `oneshot` since
//! here the signal fans out to N chain watchers plus the HTTP server, not a
//! single consumer.

use tokio::sync::watch;

/// Spawns the signal-listening task and returns a receiver that flips to
/// `true` exactly once, on the first SIGINT or SIGTERM.
pub fn spawn_on_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(wait_for_signal(tx));
    rx
}

async fn wait_for_signal(tx: watch::Sender<bool>) {
    #[cfg(unix)]
    {
        use tokio::signal::{self, unix};
        let mut sigterm = match unix::signal(unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                tracing::error!(?err, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => tracing::info!("received SIGINT"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::info!("received SIGINT");
    }

    let _ = tx.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn a_fresh_receiver_has_not_fired() {
        let (_tx, rx) = watch::channel(false);
        assert!(!*rx.borrow());
    }
}
