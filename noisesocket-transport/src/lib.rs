//! Async NoiseSocket transport.
//!
//! This crate drives the `noisesocket-core` session engine over any tokio
//! byte stream (`AsyncRead + AsyncWrite + Unpin`, typically a
//! `TcpStream`). The [`NoiseSocket`] type is the public surface: construct
//! as client or server, run the handshake message exchange, then send and
//! receive encrypted, length-framed, optionally padded transport messages.
//!
//! # Security Invariants & Hard Failures
//!
//! - Any stream failure or mid-I/O cancellation poisons the socket; only
//!   teardown remains. The single recoverable error is the documented
//!   `Crypto`-then-`switch` window during the handshake.
//! - Each wire unit is written contiguously and read exactly; no buffering,
//!   no partial processing.
//! - `NoiseSocket` and `Message` do not implement `Clone`.
//! - Decrypted payloads zeroize on drop; key material is zeroized when the
//!   session is dropped or closed.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod error;
pub mod message;
pub mod socket;
mod wire;

pub use error::SocketError;
pub use message::Message;
pub use socket::NoiseSocket;

pub use noisesocket_core::{
    HandshakeConfig, NoiseProtocol, ProtocolError, Role, Side, StaticKeypair,
};
