//! Transport errors.

use std::fmt;
use std::io;

use noisesocket_core::ProtocolError;

/// Errors from socket operations.
///
/// Almost all errors are terminal: the socket is poisoned and only teardown
/// remains. The exception is a `Crypto` protocol error from the first
/// handshake read, which an application may catch to drive a protocol
/// switch — see [`SocketError::is_crypto`].
#[derive(Debug)]
pub enum SocketError {
    /// Session-engine error from `noisesocket-core`.
    Protocol(ProtocolError),

    /// The underlying byte stream failed.
    Stream(io::Error),

    /// The stream ended in the middle of a length-prefixed packet.
    Truncated,

    /// A previous call on this socket was cancelled mid-I/O, leaving the
    /// stream position unknown; the socket is unusable.
    Cancelled,
}

impl SocketError {
    /// Whether this is the catchable cryptographic failure that signals an
    /// intentional protocol switch.
    pub fn is_crypto(&self) -> bool {
        matches!(self, Self::Protocol(ProtocolError::Crypto))
    }
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::Stream(e) => write!(f, "stream error: {e}"),
            Self::Truncated => write!(f, "stream truncated mid-packet"),
            Self::Cancelled => write!(f, "cancelled mid-i/o"),
        }
    }
}

impl std::error::Error for SocketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(e) => Some(e),
            Self::Stream(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProtocolError> for SocketError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}
