//! Scheduler service
//!
//! A single task owns the [`LeaseRegistry`] and processes datagrams strictly
//! in arrival order, so the registry needs no locking.
//!
//! ```text
//!   spider ──G──────────▶ ┌─────────────────┐
//!          ◀──name───────  │ SchedulerServer │──▶ LeaseRegistry
//!   spider ──G<name>─────▶ │  (recv loop)    │     acquire / keepalive / release
//!   spider ──R<name>─────▶ └─────────────────┘
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use super::config::SchedulerConfig;
use super::error::{SchedulerError, SchedulerResult};
use super::protocol::{self, Command, ProtocolError, RECV_BUFFER_LEN};
use super::registry::LeaseRegistry;
use super::transport::{DatagramReader, DatagramWriter};
use crate::metrics;

// ============================================================================
// Server State
// ============================================================================

/// Lifecycle of the scheduler service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Created, no socket yet
    Unbound,
    /// Socket bound, not yet receiving
    Bound,
    /// Receive loop running
    Serving,
}

impl ServerState {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Unbound => "unbound",
            Self::Bound => "bound",
            Self::Serving => "serving",
        }
    }
}

// ============================================================================
// Scheduler Server
// ============================================================================

/// UDP lease scheduler
pub struct SchedulerServer {
    config: SchedulerConfig,
    registry: LeaseRegistry,
    socket: Option<Arc<UdpSocket>>,
    state: ServerState,
}

impl SchedulerServer {
    /// Create a new scheduler with an empty registry
    ///
    /// When the config names a servers file it is loaded now; a missing or
    /// unreadable file is an error.
    pub fn new(config: SchedulerConfig) -> SchedulerResult<Self> {
        config.validate()?;

        let mut registry = LeaseRegistry::new(config.lease_timeout);

        if let Some(path) = &config.servers_file {
            registry
                .load_from_file(path)
                .map_err(|source| SchedulerError::TargetList {
                    path: path.display().to_string(),
                    source,
                })?;
        }

        Ok(Self::with_registry(config, registry))
    }

    /// Create a scheduler around an existing registry
    pub fn with_registry(config: SchedulerConfig, registry: LeaseRegistry) -> Self {
        Self {
            config,
            registry,
            socket: None,
            state: ServerState::Unbound,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Registry owned by this server
    pub fn registry(&self) -> &LeaseRegistry {
        &self.registry
    }

    /// Mutable registry access (before serving starts)
    pub fn registry_mut(&mut self) -> &mut LeaseRegistry {
        &mut self.registry
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Bind the listening socket
    ///
    /// Each resolved candidate is tried in order; the first that binds wins.
    pub async fn bind(&mut self) -> SchedulerResult<SocketAddr> {
        if self.state != ServerState::Unbound {
            return Err(SchedulerError::InvalidState {
                expected: ServerState::Unbound.as_str(),
                found: self.state.as_str(),
            });
        }

        let candidates = self.candidate_addresses().await?;
        let address = self.config.display_address();

        for candidate in &candidates {
            match UdpSocket::bind(*candidate).await {
                Ok(socket) => {
                    let local = socket
                        .local_addr()
                        .map_err(|e| SchedulerError::socket("local_addr", e))?;

                    tracing::info!(address = %local, "Scheduler bound");

                    self.socket = Some(Arc::new(socket));
                    self.state = ServerState::Bound;
                    return Ok(local);
                }
                Err(e) => {
                    tracing::warn!(candidate = %candidate, error = %e, "Bind failed, trying next address");
                }
            }
        }

        tracing::error!(address = %address, "No bindable address");
        Err(SchedulerError::NoBindableAddress {
            address,
            candidates: candidates.len(),
        })
    }

    async fn candidate_addresses(&self) -> SchedulerResult<Vec<SocketAddr>> {
        let port = self.config.port;

        match &self.config.bind_host {
            Some(host) => {
                let resolved = tokio::net::lookup_host((host.as_str(), port))
                    .await
                    .map_err(|e| SchedulerError::resolve(self.config.display_address(), e))?;
                Ok(resolved.collect())
            }
            // Passive: every interface, IPv6 first
            None => Ok(vec![
                SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, port)),
                SocketAddr::from((std::net::Ipv4Addr::UNSPECIFIED, port)),
            ]),
        }
    }

    /// Serve until `shutdown_signal` resolves
    ///
    /// Binds first if the server is still unbound. Per-datagram errors are
    /// logged and never end the loop.
    pub async fn serve_with_shutdown(
        mut self,
        shutdown_signal: impl Future<Output = ()> + Send,
    ) -> SchedulerResult<()> {
        if self.state == ServerState::Unbound {
            self.bind().await?;
        }

        let socket = match &self.socket {
            Some(socket) => Arc::clone(socket),
            None => {
                return Err(SchedulerError::InvalidState {
                    expected: ServerState::Bound.as_str(),
                    found: self.state.as_str(),
                })
            }
        };

        self.state = ServerState::Serving;
        metrics::update_registry_metrics(&self.registry.stats());

        tracing::info!(
            targets = self.registry.len(),
            lease_timeout_secs = self.registry.lease_timeout().as_secs_f64(),
            "Scheduler serving"
        );

        serve_transport(socket.as_ref(), &mut self.registry, shutdown_signal).await;

        tracing::info!("Scheduler shutdown complete");
        Ok(())
    }
}

// ============================================================================
// Receive Loop
// ============================================================================

/// Run the receive loop over any datagram transport
pub async fn serve_transport<T>(
    transport: &T,
    registry: &mut LeaseRegistry,
    shutdown_signal: impl Future<Output = ()> + Send,
) where
    T: DatagramReader + DatagramWriter + ?Sized,
{
    let mut buf = [0u8; RECV_BUFFER_LEN];
    tokio::pin!(shutdown_signal);

    loop {
        let (len, peer) = tokio::select! {
            result = transport.recv_datagram(&mut buf) => match result {
                Ok(received) => received,
                Err(e) => {
                    tracing::warn!(error = %e, "Receive failed");
                    continue;
                }
            },
            _ = &mut shutdown_signal => {
                tracing::info!("Scheduler received shutdown signal");
                break;
            }
        };

        handle_datagram(transport, registry, &buf[..len], peer).await;
    }
}

async fn handle_datagram<T>(transport: &T, registry: &mut LeaseRegistry, datagram: &[u8], peer: SocketAddr)
where
    T: DatagramWriter + ?Sized,
{
    let command = match protocol::decode(datagram) {
        Ok(command) => command,
        Err(e) => {
            log_protocol_error(&e, peer);
            metrics::record_dropped_datagram(e.reason());
            return;
        }
    };

    tracing::trace!(peer = %peer, command = command.kind(), server = ?command.target(), "Datagram received");

    let Some(name) = dispatch(registry, command) else {
        return;
    };

    let reply = protocol::encode_reply(&name);
    if let Err(e) = transport.send_datagram(&reply, peer).await {
        tracing::warn!(peer = %peer, server = %name, error = %e, "Failed to send lease reply");
    }
}

fn log_protocol_error(error: &ProtocolError, peer: SocketAddr) {
    match error {
        ProtocolError::UnknownCommand { .. } => {
            tracing::debug!(peer = %peer, error = %error, "Ignoring datagram");
        }
        _ => {
            tracing::warn!(peer = %peer, error = %error, "Ignoring malformed datagram");
        }
    }
}

/// Apply one command to the registry
///
/// Returns the name to send back to the requester, if any. Only a successful
/// acquire produces a reply.
pub fn dispatch(registry: &mut LeaseRegistry, command: Command) -> Option<String> {
    match command {
        Command::Acquire => {
            let leased = registry.acquire();
            metrics::record_acquire(leased.is_some());
            metrics::update_registry_metrics(&registry.stats());

            match &leased {
                Some(name) => tracing::debug!(server = %name, "Lease granted"),
                None => tracing::debug!("No free target"),
            }
            leased
        }
        Command::Keepalive(name) => {
            let hit = registry.keepalive(&name);
            metrics::record_keepalive(hit);
            if !hit {
                tracing::debug!(server = %name, "Keepalive for unknown target");
            }
            None
        }
        Command::Release(name) => {
            let hit = registry.release(&name);
            metrics::record_release(hit);
            metrics::update_registry_metrics(&registry.stats());

            if hit {
                tracing::debug!(server = %name, "Lease released");
            } else {
                tracing::debug!(server = %name, "Release for unknown target");
            }
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
