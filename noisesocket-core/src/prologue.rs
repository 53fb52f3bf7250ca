//! Prologue transcript accumulation.
//!
//! NoiseSocket binds the Noise prologue to a verbatim transcript of the
//! negotiation material exchanged before the handshake state exists. The
//! effective prologue is:
//!
//! ```text
//! INIT_TAG || foreach m: be16(len(m)) || m || application_prologue
//! ```
//!
//! where the tag identifies whether the session runs the initial protocol,
//! a switched protocol, or a retried one. Both peers must accumulate the
//! same messages in the same order or the handshake fails outright, which
//! is exactly what makes renegotiation tamper-evident.

use crate::error::ProtocolError;
use crate::packet::append_packet;

/// Prologue tag selecting the reinitialization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitTag {
    /// Initial protocol, or a responder Accept.
    Initial,
    /// The responder switched to a different protocol.
    Switch,
    /// The responder asked the initiator to retry.
    Retry,
}

impl InitTag {
    /// The 16 ASCII octets placed at the front of the prologue.
    pub fn bytes(self) -> &'static [u8; 16] {
        match self {
            Self::Initial => b"NoiseSocketInit1",
            Self::Switch => b"NoiseSocketInit2",
            Self::Retry => b"NoiseSocketInit3",
        }
    }
}

/// Ordered accumulator of raw negotiation-data and Noise-message bytes.
///
/// The session drops the transcript once the prologue is frozen, so no
/// later byte can leak into it.
#[derive(Debug, Default)]
pub(crate) struct Transcript {
    messages: Vec<Vec<u8>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one message verbatim. Zero-length messages occupy a slot.
    pub fn record(&mut self, message: &[u8]) {
        self.messages.push(message.to_vec());
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Assemble the prologue bytes for the given tag and application
    /// prologue.
    pub fn build(&self, tag: InitTag, app_prologue: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let mut prologue = Vec::with_capacity(
            16 + self.messages.iter().map(|m| 2 + m.len()).sum::<usize>() + app_prologue.len(),
        );
        prologue.extend_from_slice(tag.bytes());
        for message in &self.messages {
            append_packet(&mut prologue, message)?;
        }
        prologue.extend_from_slice(app_prologue);
        Ok(prologue)
    }
}
