//! Spider-side lease client
//!
//! A spider holds at most one lease at a time. While it is held, a
//! background task sends `G<name>` every heartbeat interval; releasing the
//! lease stops and joins that task before `R<name>` goes out, so the
//! scheduler never sees a keepalive after the release.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use super::config::ClientConfig;
use super::error::{SchedulerError, SchedulerResult};
use super::protocol::{self, Command, RECV_BUFFER_LEN};
use super::transport::{DatagramReader, DatagramWriter};

// ============================================================================
// Lease
// ============================================================================

/// A lease held by this client
struct Lease {
    name: String,

    /// Active flag; the heartbeat task exits once it reads `false`
    active: watch::Sender<bool>,

    heartbeat: JoinHandle<()>,
}

// ============================================================================
// Lease Client
// ============================================================================

/// Client used by spiders to obtain, keep and release scan leases
pub struct LeaseClient {
    config: ClientConfig,
    socket: Arc<UdpSocket>,
    scheduler_addr: SocketAddr,

    /// Serializes every write on the shared socket
    send_lock: Arc<Mutex<()>>,

    lease: Option<Lease>,
}

impl LeaseClient {
    /// Resolve the scheduler and bind the local socket
    pub async fn connect(config: ClientConfig) -> SchedulerResult<Self> {
        config.validate()?;

        let scheduler_addr = resolve_first(&config.scheduler_host, config.scheduler_port)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Cannot resolve scheduler"))?;

        let bind_ip = config.bind_address.unwrap_or(match scheduler_addr {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        });
        let bind_addr = SocketAddr::new(bind_ip, config.local_port);

        let socket = UdpSocket::bind(bind_addr).await.map_err(|e| {
            tracing::error!(address = %bind_addr, error = %e, "Cannot bind spider socket");
            SchedulerError::socket("bind", e)
        })?;

        tracing::info!(
            scheduler = %scheduler_addr,
            local = ?socket.local_addr().ok(),
            "Lease client ready"
        );

        Ok(Self {
            config,
            socket: Arc::new(socket),
            scheduler_addr,
            send_lock: Arc::new(Mutex::new(())),
            lease: None,
        })
    }

    /// Resolved scheduler address
    pub fn scheduler_addr(&self) -> SocketAddr {
        self.scheduler_addr
    }

    /// Local socket address
    pub fn local_addr(&self) -> SchedulerResult<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| SchedulerError::socket("local_addr", e))
    }

    /// Name of the currently held lease
    pub fn current_lease(&self) -> Option<&str> {
        self.lease.as_ref().map(|l| l.name.as_str())
    }

    /// Obtain a lease, retrying until the scheduler hands one out
    ///
    /// Blocks until a target is free. The heartbeat task is running when this
    /// returns.
    pub async fn get_server(&mut self) -> SchedulerResult<String> {
        if let Some(lease) = &self.lease {
            return Err(SchedulerError::LeaseHeld {
                name: lease.name.clone(),
            });
        }

        let request = protocol::encode(&Command::Acquire);
        let mut attempts: u64 = 0;

        let name = loop {
            attempts += 1;
            self.release_stale_grants().await?;
            self.send(&request).await?;

            match tokio::time::timeout(self.config.recv_timeout, self.recv_reply()).await {
                Ok(Ok(Some(name))) => break name,
                Ok(Ok(None)) => {
                    tracing::debug!(attempt = attempts, "Empty reply from scheduler");
                }
                Ok(Err(e)) => {
                    tracing::warn!(attempt = attempts, error = %e, "Receive from scheduler failed");
                }
                Err(_) => {
                    tracing::debug!(attempt = attempts, "No free server, retrying");
                }
            }

            tokio::time::sleep(self.config.retry_delay).await;
        };

        tracing::info!(server = %name, attempts = attempts, "Lease acquired");

        let (active, active_rx) = watch::channel(true);
        let heartbeat = spawn_heartbeat(
            Arc::clone(&self.socket),
            Arc::clone(&self.send_lock),
            self.scheduler_addr,
            name.clone(),
            self.config.heartbeat_interval,
            active_rx,
        );

        self.lease = Some(Lease {
            name: name.clone(),
            active,
            heartbeat,
        });

        Ok(name)
    }

    /// Stop the heartbeat and release the held lease
    ///
    /// Without a held lease this only logs a warning.
    pub async fn release_server(&mut self) -> SchedulerResult<()> {
        let Some(lease) = self.lease.take() else {
            tracing::warn!("Release requested without a held lease");
            return Ok(());
        };

        let _ = lease.active.send(false);
        if let Err(e) = lease.heartbeat.await {
            tracing::warn!(server = %lease.name, error = %e, "Heartbeat task ended abnormally");
        }

        self.send(&protocol::encode(&Command::Release(lease.name.clone())))
            .await?;

        tracing::info!(server = %lease.name, "Lease released");
        Ok(())
    }

    async fn send(&self, payload: &[u8]) -> SchedulerResult<()> {
        let _guard = self.send_lock.lock().await;
        self.socket
            .send_datagram(payload, self.scheduler_addr)
            .await
            .map_err(|e| SchedulerError::socket("send", e))?;
        Ok(())
    }

    /// Wait for a reply from the scheduler, ignoring other senders
    async fn recv_reply(&self) -> std::io::Result<Option<String>> {
        let mut buf = [0u8; RECV_BUFFER_LEN];

        loop {
            let (len, from) = self.socket.recv_datagram(&mut buf).await?;
            if from != self.scheduler_addr {
                tracing::debug!(peer = %from, "Ignoring datagram from unexpected peer");
                continue;
            }
            return Ok(protocol::decode_reply(&buf[..len]));
        }
    }

    /// Release grants whose request was abandoned
    ///
    /// A reply that lands after its `G` timed out (or after `get_server` was
    /// cancelled) still leases that target to this client. Each one is handed
    /// back with `R<name>` instead of waiting out the lease timeout. Returns
    /// the number released.
    pub async fn release_stale_grants(&self) -> SchedulerResult<usize> {
        let mut buf = [0u8; RECV_BUFFER_LEN];
        let mut released = 0;

        while let Ok((len, from)) = self.socket.try_recv_from(&mut buf) {
            if from != self.scheduler_addr {
                tracing::debug!(peer = %from, len = len, "Discarding datagram from unexpected peer");
                continue;
            }
            let Some(name) = protocol::decode_reply(&buf[..len]) else {
                continue;
            };
            if self.current_lease() == Some(name.as_str()) {
                continue;
            }

            tracing::debug!(server = %name, "Releasing late grant");
            self.send(&protocol::encode(&Command::Release(name))).await?;
            released += 1;
        }

        Ok(released)
    }
}

// ============================================================================
// Heartbeat Task
// ============================================================================

fn spawn_heartbeat(
    socket: Arc<UdpSocket>,
    send_lock: Arc<Mutex<()>>,
    scheduler_addr: SocketAddr,
    name: String,
    interval: Duration,
    mut active_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let payload = protocol::encode(&Command::Keepalive(name.clone()));
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // The acquire itself refreshed the lease
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                changed = active_rx.changed() => {
                    if changed.is_err() || !*active_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let _guard = send_lock.lock().await;
                    if !*active_rx.borrow() {
                        break;
                    }
                    match socket.send_datagram(&payload, scheduler_addr).await {
                        Ok(_) => tracing::trace!(server = %name, "Keepalive sent"),
                        Err(e) => tracing::warn!(server = %name, error = %e, "Keepalive failed"),
                    }
                }
            }
        }

        tracing::debug!(server = %name, "Heartbeat task stopped");
    })
}

async fn resolve_first(host: &str, port: u16) -> SchedulerResult<SocketAddr> {
    let address = format!("{host}:{port}");
    let mut resolved = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| SchedulerError::resolve(address.clone(), e))?;

    resolved.next().ok_or_else(|| {
        SchedulerError::resolve(
            address,
            std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses returned"),
        )
    })
}

// ============================================================================
// Tests
// ============================================================================
