//! Error types for the scheduler module

use std::io;
use thiserror::Error;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler and lease client errors
///
/// These are resource errors: fatal at scheduler startup or to a single
/// worker's run. Per-datagram noise is reported as
/// [`ProtocolError`](super::protocol::ProtocolError) and never surfaces here.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Address could not be resolved
    #[error("Failed to resolve '{address}': {source}")]
    Resolve {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Resolution succeeded but no candidate address could be bound
    #[error("No bindable address for '{address}' ({candidates} candidates tried)")]
    NoBindableAddress { address: String, candidates: usize },

    /// Socket operation failed
    #[error("Socket error during '{operation}': {source}")]
    Socket {
        operation: String,
        #[source]
        source: io::Error,
    },

    /// A lease is already held by this client
    #[error("Lease for '{name}' is already held")]
    LeaseHeld { name: String },

    /// Configuration rejected
    #[error("Invalid value for '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Target list could not be loaded
    #[error("Failed to load target list '{path}': {source}")]
    TargetList {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Serve loop was started in the wrong state
    #[error("Invalid server state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },
}

impl SchedulerError {
    /// Create a resolve error
    pub fn resolve(address: impl Into<String>, source: io::Error) -> Self {
        Self::Resolve {
            address: address.into(),
            source,
        }
    }

    /// Create a socket error with context
    pub fn socket(operation: impl Into<String>, source: io::Error) -> Self {
        Self::Socket {
            operation: operation.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Resolve { .. } | Self::Socket { .. })
    }
}
