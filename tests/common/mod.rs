//! Common test utilities
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use smbspider::scheduler::{
    ClientConfig, LeaseClient, LeaseRegistry, SchedulerConfig, SchedulerServer,
};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A scheduler serving on a loopback port
pub struct TestScheduler {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestScheduler {
    /// Start a scheduler over `targets` (first entry is handed out last)
    pub async fn start(targets: &[&str], lease_timeout: Duration) -> Self {
        let config = SchedulerConfig::builder()
            .bind_host("127.0.0.1")
            .port(0)
            .lease_timeout(lease_timeout)
            .build()
            .unwrap();

        let mut registry = LeaseRegistry::new(lease_timeout);
        for target in targets {
            assert!(registry.add_target(*target));
        }

        let mut server = SchedulerServer::with_registry(config, registry);
        let addr = server.bind().await.unwrap();

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            server
                .serve_with_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            shutdown: Some(tx),
            handle,
        }
    }

    /// Stop the serve loop and wait for it
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(2), &mut self.handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}

/// Client config with short timings against `scheduler`
pub fn fast_client_config(scheduler: SocketAddr) -> ClientConfig {
    ClientConfig::builder()
        .scheduler_addr(scheduler)
        .local_port(0)
        .heartbeat_interval(Duration::from_millis(50))
        .recv_timeout(Duration::from_millis(150))
        .retry_delay(Duration::from_millis(30))
        .build()
        .unwrap()
}

/// Connect a lease client with short timings
pub async fn fast_client(scheduler: SocketAddr) -> LeaseClient {
    LeaseClient::connect(fast_client_config(scheduler))
        .await
        .unwrap()
}

/// A bare socket speaking the wire protocol by hand
pub struct RawPeer {
    socket: UdpSocket,
    scheduler: SocketAddr,
}

impl RawPeer {
    pub async fn new(scheduler: SocketAddr) -> Self {
        Self {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            scheduler,
        }
    }

    pub async fn send(&self, payload: &[u8]) {
        self.socket.send_to(payload, self.scheduler).await.unwrap();
    }

    /// Send `G` and wait up to `wait` for a name
    pub async fn acquire(&self, wait: Duration) -> Option<String> {
        self.send(b"G").await;
        self.recv(wait).await
    }

    pub async fn recv(&self, wait: Duration) -> Option<String> {
        let mut buf = [0u8; 512];
        match tokio::time::timeout(wait, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => Some(String::from_utf8_lossy(&buf[..len]).into_owned()),
            _ => None,
        }
    }
}
