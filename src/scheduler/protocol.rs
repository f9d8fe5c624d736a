//! Wire codec for scheduler datagrams
//!
//! Every message is a single UDP datagram: one command byte optionally
//! followed by a target name.
//!
//! ```text
//! +------+---------------------------+
//! | 'G'  |                           |  acquire a lease (reply: name or silence)
//! | 'G'  | name (1..=255 bytes)      |  keepalive for a held lease
//! | 'R'  | name (1..=255 bytes)      |  release a held lease
//! +------+---------------------------+
//! ```
//!
//! Replies carry the bare target name. An empty reply payload means no lease.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Command byte for acquire / keepalive
pub const CMD_GET: u8 = b'G';

/// Command byte for release
pub const CMD_RELEASE: u8 = b'R';

/// Maximum target name length carried in a datagram
pub const MAX_TARGET_LEN: usize = 255;

/// Maximum datagram size accepted by the scheduler (command byte + argument)
pub const MAX_DATAGRAM_LEN: usize = 1 + 256;

/// Receive buffer size; one byte larger than the limit so oversize datagrams are detectable
pub const RECV_BUFFER_LEN: usize = MAX_DATAGRAM_LEN + 1;

// ============================================================================
// Command
// ============================================================================

/// A decoded scheduler command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `G` with no argument
    Acquire,

    /// `G<name>`
    Keepalive(String),

    /// `R<name>`
    Release(String),
}

impl Command {
    /// Short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Acquire => "acquire",
            Self::Keepalive(_) => "keepalive",
            Self::Release(_) => "release",
        }
    }

    /// Target name carried by the command, if any
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Acquire => None,
            Self::Keepalive(name) | Self::Release(name) => Some(name),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Reasons a datagram could not be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty datagram")]
    Empty,

    #[error("Datagram too large: {len} bytes (max 257)")]
    Oversized { len: usize },

    #[error("Unknown command byte: 0x{byte:02x}")]
    UnknownCommand { byte: u8 },

    #[error("Release command without target name")]
    MissingTarget,

    #[error("Target name is not valid UTF-8")]
    InvalidUtf8,
}

impl ProtocolError {
    /// Label used for the dropped-datagram metric
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Oversized { .. } => "oversized",
            Self::UnknownCommand { .. } => "unknown_command",
            Self::MissingTarget => "missing_target",
            Self::InvalidUtf8 => "invalid_utf8",
        }
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode a datagram received by the scheduler
///
/// The payload is cut at the first `\n` (and a trailing `\r`) so that
/// hand-typed commands from `nc -u` work.
pub fn decode(datagram: &[u8]) -> Result<Command, ProtocolError> {
    if datagram.len() > MAX_DATAGRAM_LEN {
        return Err(ProtocolError::Oversized {
            len: datagram.len(),
        });
    }

    let line = strip_line(datagram);
    let Some((&command, argument)) = line.split_first() else {
        return Err(ProtocolError::Empty);
    };

    let argument = std::str::from_utf8(argument).map_err(|_| ProtocolError::InvalidUtf8)?;

    match command {
        CMD_GET if argument.is_empty() => Ok(Command::Acquire),
        CMD_GET => Ok(Command::Keepalive(argument.to_string())),
        CMD_RELEASE if argument.is_empty() => Err(ProtocolError::MissingTarget),
        CMD_RELEASE => Ok(Command::Release(argument.to_string())),
        byte => Err(ProtocolError::UnknownCommand { byte }),
    }
}

/// Decode a reply received by the client
///
/// An empty payload (or one that is only a line terminator) means no lease.
pub fn decode_reply(datagram: &[u8]) -> Option<String> {
    let line = strip_line(datagram);
    if line.is_empty() {
        return None;
    }

    match std::str::from_utf8(line) {
        Ok(name) => Some(name.to_string()),
        Err(_) => {
            tracing::warn!(len = line.len(), "Discarding non UTF-8 scheduler reply");
            None
        }
    }
}

fn strip_line(datagram: &[u8]) -> &[u8] {
    let line = match datagram.iter().position(|&b| b == b'\n') {
        Some(end) => &datagram[..end],
        None => datagram,
    };

    line.strip_suffix(b"\r").unwrap_or(line)
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode a command into a datagram payload
pub fn encode(command: &Command) -> Bytes {
    let (byte, argument) = match command {
        Command::Acquire => (CMD_GET, ""),
        Command::Keepalive(name) => (CMD_GET, name.as_str()),
        Command::Release(name) => (CMD_RELEASE, name.as_str()),
    };

    let mut buf = BytesMut::with_capacity(1 + argument.len());
    buf.put_u8(byte);
    buf.put_slice(argument.as_bytes());
    buf.freeze()
}

/// Encode a reply carrying a leased target name
pub fn encode_reply(name: &str) -> Bytes {
    Bytes::copy_from_slice(name.as_bytes())
}
