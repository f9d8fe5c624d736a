//! smbspider - lease scheduling for SMB spider workers
//!
//! A central UDP scheduler hands out exclusive, time-bounded scan leases on
//! SMB servers to a pool of spider processes. Each spider crawls the server it
//! leased, stores what it found and gives the lease back.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`scheduler`] - Lease registry, datagram protocol, scheduler service and lease client
//! - [`spider`] - Crawl collaborator and the spider run loop
//! - [`storage`] - File record persistence (SQLite)
//! - [`config`] - Configuration management and settings
//! - [`metrics`] - Prometheus metrics and exporter
//! - [`error`] - Unified error type
//!
//! # Example
//!
//! ```no_run
//! use smbspider::scheduler::{ClientConfig, LeaseClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut client = LeaseClient::connect(ClientConfig::default()).await?;
//!     let server = client.get_server().await?;
//!     println!("scanning {server}");
//!     client.release_server().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod scheduler;
pub mod spider;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result, SpiderErrorTrait};
    pub use crate::scheduler::{
        ClientConfig, LeaseClient, LeaseRegistry, SchedulerConfig, SchedulerServer,
    };
    pub use crate::spider::{Crawler, MountCrawler, ScanReport, SpiderConfig, SpiderRunner};
    pub use crate::storage::{FileRecord, SqliteSession, StorageSession};
}
