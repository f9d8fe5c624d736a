pub mod scheduler;
pub mod spider;

use std::net::SocketAddr;
use std::time::Duration;

use smbspider::metrics;
use tokio::sync::watch;
use tokio::task::JoinHandle;

// Re-export command functions for convenience
pub use scheduler::{scheduler, SchedulerParams};
pub use spider::{spider, SpiderParams};

/// Flip the returned channel to `true` on Ctrl+C
pub(crate) fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
            }
            Err(e) => {
                tracing::error!("Failed to wait for Ctrl+C: {}", e);
            }
        }
        let _ = tx.send(true);
    });

    rx
}

/// Resolve once `rx` turns `true` or its sender is gone
pub(crate) async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Start the Prometheus exporter when an address is configured
pub(crate) fn spawn_exporter(
    addr: Option<SocketAddr>,
    shutdown: &watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    let addr = addr?;
    let signal = wait_for_shutdown(shutdown.clone());

    Some(tokio::spawn(async move {
        if let Err(e) = metrics::serve_metrics(addr, signal).await {
            tracing::error!(error = %e, "Metrics exporter failed");
        }
    }))
}

/// Wait for a running exporter to drain its connections
pub(crate) async fn finish_exporter(exporter: Option<JoinHandle<()>>) {
    let Some(handle) = exporter else {
        return;
    };

    if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
        tracing::warn!("Metrics exporter did not stop in time");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exporter_disabled_without_address() {
        let (_tx, rx) = watch::channel(false);
        assert!(spawn_exporter(None, &rx).is_none());
    }

    #[tokio::test]
    async fn test_exporter_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let handle = spawn_exporter(Some("127.0.0.1:0".parse().unwrap()), &rx).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("exporter did not stop")
            .unwrap();
    }
}
