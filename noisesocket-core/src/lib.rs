//! NoiseSocket session engine.
//!
//! NoiseSocket is an encoding and framing layer on top of the Noise
//! Protocol Framework: two peers negotiate a concrete Noise protocol over a
//! reliable byte stream, complete the handshake, and then exchange
//! authenticated, length-framed, optionally padded transport messages.
//!
//! This crate is the sans-I/O core:
//! - length-prefixed packet encoding ([`packet`])
//! - the prologue transcript that binds the negotiation exchange into the
//!   session identity ([`prologue`])
//! - the Noise collaborator seam over `snow` ([`noise`])
//! - the session state machine with the one-shot Accept/Switch/Retry
//!   reinitialization ([`session`])
//!
//! It moves no bytes itself; `noisesocket-transport` drives a [`Session`]
//! over an async stream.
//!
//! # Security Invariants
//!
//! - The Noise prologue is bound to the verbatim pre-handshake transcript,
//!   making protocol renegotiation tamper-evident
//! - Errors are terminal except the documented Switch window
//! - Key material and decrypted payloads are zeroized
//! - Direct use of `unsafe` is forbidden (#![forbid(unsafe_code)])

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod error;
mod noise;
pub mod packet;
pub mod prologue;
pub mod protocol;
pub mod session;

pub use error::ProtocolError;
pub use prologue::InitTag;
pub use protocol::{HandshakeConfig, NoiseProtocol, Role, StaticKeypair};
pub use session::{Session, Side};
