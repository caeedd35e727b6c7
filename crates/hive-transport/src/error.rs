use std::io;

use hive_codec::CodecError;
use thiserror::Error;

/// Errors returned by [`crate::Transmitter`] implementations and the server.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Opening a connection to the peer failed.
    #[error("connect to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    /// Endpoint did not resolve to any socket address.
    #[error("cannot resolve {0}")]
    Resolve(String),
    /// Socket-level failure outside frame handling.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// Failure while writing the request or reading the reply frame.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// Peer closed the connection without replying.
    #[error("connection closed by peer")]
    Closed,
    /// Peer is known to be absent.
    #[error("peer {0} is unreachable")]
    Unreachable(String),
    /// Peer accepted the request but produced no reply.
    #[error("peer {0} produced no reply")]
    NoReply(String),
    /// Every attempt failed with a transient error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<TransportError>,
    },
}

impl TransportError {
    /// True when the peer should be treated as dead rather than retried.
    pub fn is_dead(&self) -> bool {
        match self {
            Self::Connect { .. }
            | Self::Resolve(_)
            | Self::Unreachable(_)
            | Self::NoReply(_)
            | Self::Exhausted { .. } => true,
            Self::Io(err) | Self::Codec(CodecError::Io(err)) => is_dead_io(err.kind()),
            Self::Codec(_) | Self::Closed => false,
        }
    }
}

/// Error kinds meaning the peer is gone, as opposed to a stale or reset socket.
pub fn is_dead_io(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::AddrNotAvailable
    )
}
