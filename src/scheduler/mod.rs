//! UDP lease scheduler for spider workers
//!
//! The scheduler hands out exclusive, time-bounded scan leases on SMB
//! servers to a pool of interchangeable spiders. Targets are handed out
//! round-robin; a lease stays alive while its holder sends keepalives and
//! is reclaimed once they stop for longer than the lease timeout.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │             Scheduler Server             │
//! │                                          │
//! │  UDP :2050 ──▶ protocol::decode          │
//! │                     │                    │
//! │               ┌─────▼──────┐             │
//! │               │   Lease    │  cursor ─┐  │
//! │               │  Registry  │ ◀────────┘  │
//! │               └────────────┘             │
//! └──────────────────────────────────────────┘
//!        ▲ G / G<name> / R<name>   │ name
//!        │                         ▼
//!   ┌─────────┐  ┌─────────┐  ┌─────────┐
//!   │ spider  │  │ spider  │  │ spider  │   LeaseClient + heartbeat task
//!   └─────────┘  └─────────┘  └─────────┘
//! ```
//!
//! # Modules
//!
//! - [`registry`] - Target list, rotation cursor and lease bookkeeping
//! - [`protocol`] - Datagram codec
//! - [`transport`] - Send/receive capabilities over datagram sockets
//! - [`server`] - Scheduler service
//! - [`client`] - Spider-side lease client
//! - [`config`] - Runtime configuration for server and client
//! - [`error`] - Scheduler errors
//!
//! # Usage
//!
//! ```ignore
//! use smbspider::scheduler::{ClientConfig, LeaseClient};
//!
//! let mut client = LeaseClient::connect(ClientConfig::default()).await?;
//! let server = client.get_server().await?;
//! // ... scan `server` ...
//! client.release_server().await?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod transport;

// Re-export main types
pub use client::LeaseClient;
pub use config::{ClientConfig, SchedulerConfig, SCHEDULER_PORT, SPIDER_PORT};
pub use error::{SchedulerError, SchedulerResult};
pub use protocol::{Command, ProtocolError};
pub use registry::{LeaseRegistry, RegistryStats, Target, DEFAULT_LEASE_TIMEOUT};
pub use server::{SchedulerServer, ServerState};
pub use transport::{DatagramReader, DatagramWriter};
