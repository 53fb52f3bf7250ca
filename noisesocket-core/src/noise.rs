//! Noise collaborator seam.
//!
//! This module wraps the `snow` library behind two narrow types: a
//! [`NoiseHandshake`] that is built lazily once the prologue transcript is
//! known, and the [`NoiseTransport`] it turns into at completion. The
//! session engine never touches `snow` directly, and every `snow::Error`
//! surfaces as [`ProtocolError::Crypto`].
//!
//! Key material lives inside the snow states and is zeroized when they are
//! dropped: at completion (the handshake state is consumed), on
//! reinitialization (the superseded state is discarded), and at teardown.

use snow::{HandshakeState, TransportState};
use zeroize::Zeroizing;

use crate::error::ProtocolError;
use crate::packet::{MAX_PACKET_LENGTH, TAG_SIZE};
use crate::protocol::{HandshakeConfig, NoiseProtocol, Role};

/// An in-progress Noise handshake.
pub(crate) struct NoiseHandshake {
    state: Box<HandshakeState>,
}

impl std::fmt::Debug for NoiseHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoiseHandshake").finish_non_exhaustive()
    }
}

impl NoiseHandshake {
    /// Build the handshake state from a protocol, a configuration, and the
    /// frozen prologue bytes.
    ///
    /// # Errors
    ///
    /// Returns `Crypto` when the collaborator rejects the construction:
    /// missing required keys, a PSK count that does not match the pattern's
    /// modifiers, or an unsupported pattern.
    pub fn new(
        protocol: &NoiseProtocol,
        config: &HandshakeConfig,
        prologue: &[u8],
    ) -> Result<Self, ProtocolError> {
        let positions = protocol.psk_positions();
        if positions.len() != config.psks.len() {
            return Err(ProtocolError::Crypto);
        }

        let mut builder = snow::Builder::new(protocol.params()).prologue(prologue);

        if let Some(key) = &config.local_static {
            builder = builder.local_private_key(key);
        }
        if let Some(key) = &config.remote_static {
            builder = builder.remote_public_key(key);
        }
        for (position, key) in positions.into_iter().zip(&config.psks) {
            builder = builder.psk(position, key);
        }

        let state = match config.role {
            Role::Initiator => builder.build_initiator(),
            Role::Responder => builder.build_responder(),
        }
        .map_err(|_| ProtocolError::Crypto)?;

        Ok(Self {
            state: Box::new(state),
        })
    }

    /// Produce the next Noise handshake message carrying `payload`.
    pub fn write_message(&mut self, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = vec![0u8; MAX_PACKET_LENGTH];
        let len = self
            .state
            .write_message(payload, &mut buf)
            .map_err(|_| ProtocolError::Crypto)?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Consume one Noise handshake message, returning its payload.
    pub fn read_message(&mut self, message: &[u8]) -> Result<Zeroizing<Vec<u8>>, ProtocolError> {
        let mut buf = Zeroizing::new(vec![0u8; MAX_PACKET_LENGTH]);
        let len = self
            .state
            .read_message(message, &mut buf)
            .map_err(|_| ProtocolError::Crypto)?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Whether the pattern's message sequence has been exhausted.
    pub fn is_finished(&self) -> bool {
        self.state.is_handshake_finished()
    }

    /// Convert into transport mode, capturing the handshake hash.
    pub fn into_transport(self) -> Result<(Vec<u8>, NoiseTransport), ProtocolError> {
        let hash = self.state.get_handshake_hash().to_vec();
        let transport = self
            .state
            .into_transport_mode()
            .map_err(|_| ProtocolError::Crypto)?;
        Ok((
            hash,
            NoiseTransport {
                state: Box::new(transport),
            },
        ))
    }
}

/// The post-handshake AEAD transport.
pub(crate) struct NoiseTransport {
    state: Box<TransportState>,
}

impl NoiseTransport {
    /// Encrypt one plaintext, appending the 16-byte tag.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = vec![0u8; plaintext.len() + TAG_SIZE];
        let len = self
            .state
            .write_message(plaintext, &mut buf)
            .map_err(|_| ProtocolError::Crypto)?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Decrypt and authenticate one ciphertext.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, ProtocolError> {
        let mut buf = Zeroizing::new(vec![0u8; ciphertext.len()]);
        let len = self
            .state
            .read_message(ciphertext, &mut buf)
            .map_err(|_| ProtocolError::Crypto)?;
        buf.truncate(len);
        Ok(buf)
    }
}
