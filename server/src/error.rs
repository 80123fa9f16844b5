//! Error taxonomy for per-connection failures.
//!
//! None of these are fatal to the server process. Each one is recovered
//! locally by evicting the affected connection (or, for `Capacity` under the
//! drop policy, by discarding a single input).

use shared::CodecError;
use std::fmt;
use std::io;

use crate::connection::ConnectionId;

/// Why a write to a single connection's outbound queue failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFailure {
    /// The peer is not draining its queue fast enough.
    Full,
    /// The writer task has exited.
    Closed,
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteFailure::Full => write!(f, "outbound queue full"),
            WriteFailure::Closed => write!(f, "outbound queue closed"),
        }
    }
}

#[derive(Debug)]
pub enum ConnectionError {
    /// The stream could not be prepared for messaging.
    Handshake(io::Error),
    /// A frame arrived but its payload could not be parsed.
    Decode(CodecError),
    /// The underlying stream failed while reading.
    Read(io::Error),
    /// A frame could not be handed to the connection's writer.
    Write {
        id: ConnectionId,
        reason: WriteFailure,
    },
    /// The input ingestion channel was full and the input was discarded.
    Capacity,
    /// The loop consuming this connection's input has shut down.
    Closed,
    /// Another live connection is already registered under this id.
    Duplicate(ConnectionId),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Handshake(e) => write!(f, "handshake failed: {}", e),
            ConnectionError::Decode(e) => write!(f, "undecodable frame: {}", e),
            ConnectionError::Read(e) => write!(f, "read failed: {}", e),
            ConnectionError::Write { id, reason } => {
                write!(f, "write to connection {} failed: {}", id, reason)
            }
            ConnectionError::Capacity => write!(f, "input channel full"),
            ConnectionError::Closed => write!(f, "sync loop closed"),
            ConnectionError::Duplicate(id) => write!(f, "connection {} is already registered", id),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::Handshake(e) | ConnectionError::Read(e) => Some(e),
            ConnectionError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CodecError> for ConnectionError {
    fn from(e: CodecError) -> Self {
        ConnectionError::Decode(e)
    }
}

impl ConnectionError {
    /// Whether the reader task must stop after this error.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConnectionError::Capacity)
    }
}
