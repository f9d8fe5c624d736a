//! Configuration management for smbspider
//!
//! Settings come from a TOML file, from `SMBSPIDER_*` environment variables,
//! or from defaults, and are then narrowed by command-line flags. The runtime
//! configs consumed by the scheduler and the lease client are derived from
//! here.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::scheduler::config::{
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_RECV_TIMEOUT, DEFAULT_RETRY_DELAY, SCHEDULER_HOST,
};
use crate::scheduler::{
    ClientConfig, SchedulerConfig, SchedulerError, DEFAULT_LEASE_TIMEOUT, SCHEDULER_PORT,
    SPIDER_PORT,
};
use crate::spider::crawl::DEFAULT_MAX_DEPTH;
use crate::spider::{SpiderConfig, DEFAULT_IDLE_DELAY};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheduler service configuration
    pub scheduler: SchedulerSection,

    /// Lease client configuration
    pub client: ClientSection,

    /// Spider worker configuration
    pub spider: SpiderSection,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// `[scheduler]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Host to bind (all interfaces when unset)
    pub bind_host: Option<String>,

    /// UDP port to listen on
    pub port: u16,

    /// Lease timeout in seconds
    pub lease_timeout_secs: u64,

    /// Newline-delimited target list
    pub servers_file: Option<PathBuf>,

    /// Prometheus exporter address (disabled when unset)
    pub metrics_address: Option<SocketAddr>,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            bind_host: None,
            port: SCHEDULER_PORT,
            lease_timeout_secs: DEFAULT_LEASE_TIMEOUT.as_secs(),
            servers_file: None,
            metrics_address: None,
        }
    }
}

/// `[client]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub scheduler_host: String,
    pub scheduler_port: u16,
    pub bind_address: Option<IpAddr>,
    pub local_port: u16,
    pub heartbeat_interval_secs: u64,
    pub recv_timeout_secs: u64,
    pub retry_delay_secs: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            scheduler_host: SCHEDULER_HOST.to_string(),
            scheduler_port: SCHEDULER_PORT,
            bind_address: None,
            local_port: SPIDER_PORT,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL.as_secs(),
            recv_timeout_secs: DEFAULT_RECV_TIMEOUT.as_secs(),
            retry_delay_secs: DEFAULT_RETRY_DELAY.as_secs(),
        }
    }
}

/// `[spider]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiderSection {
    /// Directory holding one mounted share per server
    pub mount_root: PathBuf,

    /// SQLite database path
    pub database: PathBuf,

    /// Maximum directory depth below a share root
    pub max_depth: usize,

    /// Pause between scans in seconds
    pub idle_delay_secs: u64,

    /// Delete records for files that disappeared
    pub prune_missing: bool,

    /// Detect MIME types from file headers
    pub sniff_mime: bool,

    /// Prometheus exporter address for this worker (disabled when unset)
    pub metrics_address: Option<SocketAddr>,
}

impl Default for SpiderSection {
    fn default() -> Self {
        Self {
            mount_root: PathBuf::from("/mnt/smb"),
            database: PathBuf::from("data/smbspider.db"),
            max_depth: DEFAULT_MAX_DEPTH,
            idle_delay_secs: DEFAULT_IDLE_DELAY.as_secs(),
            prune_missing: true,
            sniff_mime: true,
            metrics_address: None,
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Unset or unparsable variables keep their default.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let scheduler = SchedulerSection {
            bind_host: env_string("SMBSPIDER_BIND_HOST"),
            port: env_or("SMBSPIDER_PORT", defaults.scheduler.port),
            lease_timeout_secs: env_or(
                "SMBSPIDER_LEASE_TIMEOUT",
                defaults.scheduler.lease_timeout_secs,
            ),
            servers_file: env_string("SMBSPIDER_SERVERS_FILE").map(PathBuf::from),
            metrics_address: env_string("SMBSPIDER_METRICS_ADDRESS")
                .map(|v| v.parse())
                .transpose()
                .context("SMBSPIDER_METRICS_ADDRESS is not a socket address")?,
        };

        let client = ClientSection {
            scheduler_host: env_string("SMBSPIDER_SCHEDULER_HOST")
                .unwrap_or(defaults.client.scheduler_host),
            scheduler_port: env_or("SMBSPIDER_SCHEDULER_PORT", defaults.client.scheduler_port),
            bind_address: env_string("SMBSPIDER_CLIENT_BIND")
                .map(|v| v.parse())
                .transpose()
                .context("SMBSPIDER_CLIENT_BIND is not an IP address")?,
            local_port: env_or("SMBSPIDER_LOCAL_PORT", defaults.client.local_port),
            heartbeat_interval_secs: env_or(
                "SMBSPIDER_HEARTBEAT_INTERVAL",
                defaults.client.heartbeat_interval_secs,
            ),
            recv_timeout_secs: env_or("SMBSPIDER_RECV_TIMEOUT", defaults.client.recv_timeout_secs),
            retry_delay_secs: env_or("SMBSPIDER_RETRY_DELAY", defaults.client.retry_delay_secs),
        };

        let spider = SpiderSection {
            mount_root: env_string("SMBSPIDER_MOUNT_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.spider.mount_root),
            database: env_string("SMBSPIDER_DATABASE")
                .map(PathBuf::from)
                .unwrap_or(defaults.spider.database),
            max_depth: env_or("SMBSPIDER_MAX_DEPTH", defaults.spider.max_depth),
            idle_delay_secs: env_or("SMBSPIDER_IDLE_DELAY", defaults.spider.idle_delay_secs),
            prune_missing: env_or("SMBSPIDER_PRUNE_MISSING", defaults.spider.prune_missing),
            sniff_mime: env_or("SMBSPIDER_SNIFF_MIME", defaults.spider.sniff_mime),
            metrics_address: env_string("SMBSPIDER_SPIDER_METRICS_ADDRESS")
                .map(|v| v.parse())
                .transpose()
                .context("SMBSPIDER_SPIDER_METRICS_ADDRESS is not a socket address")?,
        };

        let logging = LoggingConfig {
            level: env_string("SMBSPIDER_LOG_LEVEL").unwrap_or(defaults.logging.level),
            format: env_string("SMBSPIDER_LOG_FORMAT").unwrap_or(defaults.logging.format),
        };

        Ok(Self {
            scheduler,
            client,
            spider,
            logging,
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.port == 0 {
            anyhow::bail!("scheduler.port must be greater than 0");
        }

        if self.client.scheduler_port == 0 {
            anyhow::bail!("client.scheduler_port must be greater than 0");
        }

        if self.client.heartbeat_interval_secs == 0 {
            anyhow::bail!("client.heartbeat_interval_secs must be greater than 0");
        }

        if self.client.recv_timeout_secs == 0 {
            anyhow::bail!("client.recv_timeout_secs must be greater than 0");
        }

        // A lease that expires between two keepalives is reclaimed while still in use
        if self.scheduler.lease_timeout_secs <= self.client.heartbeat_interval_secs {
            anyhow::bail!(
                "scheduler.lease_timeout_secs ({}) must be greater than client.heartbeat_interval_secs ({})",
                self.scheduler.lease_timeout_secs,
                self.client.heartbeat_interval_secs
            );
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be 'text' or 'json'");
        }

        Ok(())
    }

    /// Get the lease timeout as Duration
    #[must_use]
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.scheduler.lease_timeout_secs)
    }

    /// Runtime configuration for the scheduler service
    pub fn scheduler_config(&self) -> Result<SchedulerConfig, SchedulerError> {
        let section = &self.scheduler;
        let mut builder = SchedulerConfig::builder()
            .port(section.port)
            .lease_timeout(self.lease_timeout());

        if let Some(host) = &section.bind_host {
            builder = builder.bind_host(host.clone());
        }
        if let Some(path) = &section.servers_file {
            builder = builder.servers_file(path.clone());
        }
        if let Some(addr) = section.metrics_address {
            builder = builder.metrics_address(addr);
        }

        builder.build()
    }

    /// Runtime configuration for the lease client
    pub fn client_config(&self) -> Result<ClientConfig, SchedulerError> {
        let section = &self.client;
        let mut builder = ClientConfig::builder()
            .scheduler_host(section.scheduler_host.clone())
            .scheduler_port(section.scheduler_port)
            .local_port(section.local_port)
            .heartbeat_interval(Duration::from_secs(section.heartbeat_interval_secs))
            .recv_timeout(Duration::from_secs(section.recv_timeout_secs))
            .retry_delay(Duration::from_secs(section.retry_delay_secs));

        if let Some(addr) = section.bind_address {
            builder = builder.bind_address(addr);
        }

        builder.build()
    }

    /// Run-loop settings for the spider
    pub fn spider_config(&self) -> SpiderConfig {
        SpiderConfig {
            idle_delay: Duration::from_secs(self.spider.idle_delay_secs),
            prune_missing: self.spider.prune_missing,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
