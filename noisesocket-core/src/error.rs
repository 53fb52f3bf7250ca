//! Protocol errors.
//!
//! With one exception, errors are terminal: the session is poisoned and only
//! teardown remains. The exception is [`ProtocolError::Crypto`] raised by the
//! first read of a handshake message before the session has been
//! reinitialized — the documented window in which the application may call
//! `switch` to install a fallback protocol.

use std::fmt;

/// All possible session-engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Bad construction input: one-way pattern, wrong role for the
    /// constructor, or a pre-shared key of the wrong length.
    InvalidArgument,

    /// The state machine forbids this call: wrong next operation, second
    /// reinitialization, handshake call after completion, transport call
    /// before completion, or any call on a failed session.
    InvalidOperation,

    /// A length field would exceed 65535.
    TooLarge,

    /// On-wire byte structure inconsistent with the framing rules.
    Malformed,

    /// The Noise collaborator failed: decryption or authentication failure,
    /// missing required key, or unsupported pattern.
    Crypto,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Deliberately terse. Do not leak details.
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::InvalidOperation => write!(f, "invalid operation"),
            Self::TooLarge => write!(f, "message too large"),
            Self::Malformed => write!(f, "malformed message"),
            Self::Crypto => write!(f, "crypto failure"),
        }
    }
}

impl std::error::Error for ProtocolError {}
