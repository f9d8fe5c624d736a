//! Scheduler and lease client configuration

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use super::error::SchedulerError;
use super::registry::DEFAULT_LEASE_TIMEOUT;

/// Well-known scheduler port
pub const SCHEDULER_PORT: u16 = 2050;

/// Fixed local port used by spiders, so the scheduler can be firewalled to known peers
pub const SPIDER_PORT: u16 = 2051;

/// Default scheduler host for spiders
pub const SCHEDULER_HOST: &str = "localhost";

/// Default keepalive interval
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Default wait for a reply to `G`
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Default pause between unanswered `G` attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

// ============================================================================
// Scheduler Configuration
// ============================================================================

/// Configuration for the scheduler service
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Host to bind; `None` binds every local interface
    pub bind_host: Option<String>,

    /// UDP port to listen on
    pub port: u16,

    /// Age after which an un-refreshed lease is reclaimed
    pub lease_timeout: Duration,

    /// Newline-delimited list of targets loaded at startup
    pub servers_file: Option<PathBuf>,

    /// Address for the Prometheus exporter (disabled when `None`)
    pub metrics_address: Option<SocketAddr>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            bind_host: None,
            port: SCHEDULER_PORT,
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
            servers_file: None,
            metrics_address: None,
        }
    }
}

impl SchedulerConfig {
    /// Create a new config builder
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.lease_timeout.is_zero() {
            return Err(SchedulerError::invalid_config(
                "lease_timeout",
                "Lease timeout must be greater than zero",
            ));
        }

        if let Some(host) = &self.bind_host {
            if host.trim().is_empty() {
                return Err(SchedulerError::invalid_config(
                    "bind_host",
                    "Host must not be empty",
                ));
            }
        }

        Ok(())
    }

    /// Host and port string used in logs and errors
    pub fn display_address(&self) -> String {
        format!(
            "{}:{}",
            self.bind_host.as_deref().unwrap_or("*"),
            self.port
        )
    }
}

/// Builder for SchedulerConfig
#[derive(Debug, Default)]
pub struct SchedulerConfigBuilder {
    bind_host: Option<String>,
    port: Option<u16>,
    lease_timeout: Option<Duration>,
    servers_file: Option<PathBuf>,
    metrics_address: Option<SocketAddr>,
}

impl SchedulerConfigBuilder {
    /// Set bind host
    pub fn bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = Some(host.into());
        self
    }

    /// Set listen port (0 picks an ephemeral port)
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set lease timeout
    pub fn lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = Some(timeout);
        self
    }

    /// Set target list path
    pub fn servers_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.servers_file = Some(path.into());
        self
    }

    /// Set metrics exporter address
    pub fn metrics_address(mut self, addr: SocketAddr) -> Self {
        self.metrics_address = Some(addr);
        self
    }

    /// Build the config
    pub fn build(self) -> Result<SchedulerConfig, SchedulerError> {
        let config = SchedulerConfig {
            bind_host: self.bind_host,
            port: self.port.unwrap_or(SCHEDULER_PORT),
            lease_timeout: self.lease_timeout.unwrap_or(DEFAULT_LEASE_TIMEOUT),
            servers_file: self.servers_file,
            metrics_address: self.metrics_address,
        };

        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Client Configuration
// ============================================================================

/// Configuration for the spider-side lease client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Scheduler hostname
    pub scheduler_host: String,

    /// Scheduler port
    pub scheduler_port: u16,

    /// Local address to bind; `None` picks the unspecified address of the scheduler's family
    pub bind_address: Option<IpAddr>,

    /// Local UDP port (0 picks an ephemeral port)
    pub local_port: u16,

    /// Keepalive interval while a lease is held
    pub heartbeat_interval: Duration,

    /// Wait for a reply to `G`
    pub recv_timeout: Duration,

    /// Pause between unanswered `G` attempts
    pub retry_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            scheduler_host: SCHEDULER_HOST.to_string(),
            scheduler_port: SCHEDULER_PORT,
            bind_address: None,
            local_port: SPIDER_PORT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl ClientConfig {
    /// Create a new config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.scheduler_host.trim().is_empty() {
            return Err(SchedulerError::invalid_config(
                "scheduler_host",
                "Host must not be empty",
            ));
        }

        if self.scheduler_port == 0 {
            return Err(SchedulerError::invalid_config(
                "scheduler_port",
                "Port must not be zero",
            ));
        }

        for (field, value) in [
            ("heartbeat_interval", self.heartbeat_interval),
            ("recv_timeout", self.recv_timeout),
        ] {
            if value.is_zero() {
                return Err(SchedulerError::invalid_config(
                    field,
                    "Interval must be greater than zero",
                ));
            }
        }

        Ok(())
    }

    /// `host:port` of the scheduler
    pub fn scheduler_address(&self) -> String {
        format!("{}:{}", self.scheduler_host, self.scheduler_port)
    }
}

/// Builder for ClientConfig
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    scheduler_host: Option<String>,
    scheduler_port: Option<u16>,
    bind_address: Option<IpAddr>,
    local_port: Option<u16>,
    heartbeat_interval: Option<Duration>,
    recv_timeout: Option<Duration>,
    retry_delay: Option<Duration>,
}

impl ClientConfigBuilder {
    /// Set scheduler host
    pub fn scheduler_host(mut self, host: impl Into<String>) -> Self {
        self.scheduler_host = Some(host.into());
        self
    }

    /// Set scheduler port
    pub fn scheduler_port(mut self, port: u16) -> Self {
        self.scheduler_port = Some(port);
        self
    }

    /// Set scheduler host and port from a socket address
    pub fn scheduler_addr(mut self, addr: SocketAddr) -> Self {
        self.scheduler_host = Some(addr.ip().to_string());
        self.scheduler_port = Some(addr.port());
        self
    }

    /// Set local bind address
    pub fn bind_address(mut self, addr: IpAddr) -> Self {
        self.bind_address = Some(addr);
        self
    }

    /// Set local port
    pub fn local_port(mut self, port: u16) -> Self {
        self.local_port = Some(port);
        self
    }

    /// Set heartbeat interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    /// Set reply timeout
    pub fn recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = Some(timeout);
        self
    }

    /// Set retry delay
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Build the config
    pub fn build(self) -> Result<ClientConfig, SchedulerError> {
        let config = ClientConfig {
            scheduler_host: self
                .scheduler_host
                .unwrap_or_else(|| SCHEDULER_HOST.to_string()),
            scheduler_port: self.scheduler_port.unwrap_or(SCHEDULER_PORT),
            bind_address: self.bind_address,
            local_port: self.local_port.unwrap_or(SPIDER_PORT),
            heartbeat_interval: self.heartbeat_interval.unwrap_or(DEFAULT_HEARTBEAT_INTERVAL),
            recv_timeout: self.recv_timeout.unwrap_or(DEFAULT_RECV_TIMEOUT),
            retry_delay: self.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY),
        };

        config.validate()?;
        Ok(config)
    }
}
