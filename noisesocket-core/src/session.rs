//! NoiseSocket session state machine.
//!
//! A [`Session`] is the sans-I/O engine behind one connection: it tracks the
//! lifecycle (handshake, transport, failed), enforces the legal call order,
//! owns the prologue transcript and the lazily-built Noise handshake, and
//! performs the one-shot Accept/Switch/Retry reinitialization. Operations
//! consume and produce byte buffers; moving those bytes over a stream is the
//! transport layer's job.
//!
//! Call order during the handshake, per wire unit:
//!
//! - client: write, read negotiation, read message, write, ...
//! - server: read negotiation, read message, write, ...
//!
//! where "write" covers [`Session::write_handshake_message`] and
//! [`Session::write_empty_handshake_message`], and "read message" covers
//! [`Session::read_handshake_message`] and
//! [`Session::ignore_handshake_message`]. Any deviation fails
//! `InvalidOperation` without touching the session.
//!
//! # Failure semantics
//!
//! Errors other than `InvalidOperation` poison the session: every later call
//! fails `InvalidOperation` and only teardown remains. The single exception
//! is `Crypto` from [`Session::read_handshake_message`] before the
//! reinitialization has been consumed — the window in which the application
//! is expected to call [`Session::switch`] and continue under a fallback
//! protocol. The transcript still holds the raw bytes the new prologue
//! needs.

use zeroize::Zeroizing;

use crate::error::ProtocolError;
use crate::noise::{NoiseHandshake, NoiseTransport};
use crate::packet::{append_packet, read_length, LENGTH_PREFIX_SIZE, MAX_PACKET_LENGTH, TAG_SIZE};
use crate::prologue::{InitTag, Transcript};
use crate::protocol::{HandshakeConfig, NoiseProtocol, Role};

/// Byte-stream side. Decided at construction, never changes — unlike the
/// Noise role, which can flip on Switch or Retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Opened the connection; initiates the initial handshake.
    Client,
    /// Accepted the connection; responds to the initial handshake.
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextOp {
    Write,
    ReadNegotiation,
    ReadMessage,
}

#[derive(Debug)]
enum Phase {
    Handshake(NextOp),
    Transport,
    Failed,
}

#[derive(Debug, Clone, Copy)]
enum Reinit {
    Accept,
    Switch,
    Retry,
}

/// One NoiseSocket session.
pub struct Session {
    side: Side,
    protocol: Option<NoiseProtocol>,
    config: Option<HandshakeConfig>,
    phase: Phase,
    init_tag: InitTag,
    reinitialized: bool,
    handshake: Option<NoiseHandshake>,
    transport: Option<NoiseTransport>,
    transcript: Option<Transcript>,
    handshake_hash: Option<Vec<u8>>,
    next_encrypted: bool,
}

impl Session {
    /// Create a client session committed to an initial protocol.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` unless the configuration's role is `Initiator`.
    pub fn new_client(
        protocol: NoiseProtocol,
        config: HandshakeConfig,
    ) -> Result<Self, ProtocolError> {
        if config.role() != Role::Initiator {
            return Err(ProtocolError::InvalidArgument);
        }
        Ok(Self::build(
            Side::Client,
            Some(protocol),
            Some(config),
            NextOp::Write,
        ))
    }

    /// Create a server session with no protocol. The session must be
    /// reinitialized via [`Session::accept`], [`Session::switch`] or
    /// [`Session::retry`] before its first cryptographic operation.
    pub fn new_server() -> Self {
        Self::build(Side::Server, None, None, NextOp::ReadNegotiation)
    }

    /// Create a server session holding a speculative default protocol, so
    /// it can attempt to read the first handshake message before deciding
    /// whether to reinitialize.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` unless the configuration's role is `Responder`.
    pub fn new_server_with_protocol(
        protocol: NoiseProtocol,
        config: HandshakeConfig,
    ) -> Result<Self, ProtocolError> {
        if config.role() != Role::Responder {
            return Err(ProtocolError::InvalidArgument);
        }
        Ok(Self::build(
            Side::Server,
            Some(protocol),
            Some(config),
            NextOp::ReadNegotiation,
        ))
    }

    fn build(
        side: Side,
        protocol: Option<NoiseProtocol>,
        config: Option<HandshakeConfig>,
        next: NextOp,
    ) -> Self {
        let next_encrypted = protocol
            .as_ref()
            .map(NoiseProtocol::first_message_is_encrypted)
            .unwrap_or(false);
        Self {
            side,
            protocol,
            config,
            phase: Phase::Handshake(next),
            init_tag: InitTag::Initial,
            reinitialized: false,
            handshake: None,
            transport: None,
            transcript: Some(Transcript::new()),
            handshake_hash: None,
            next_encrypted,
        }
    }

    /// Byte-stream side.
    pub fn side(&self) -> Side {
        self.side
    }

    /// Canonical name of the current protocol, if one is installed.
    pub fn protocol_name(&self) -> Option<&str> {
        self.protocol.as_ref().map(NoiseProtocol::name)
    }

    /// Whether the handshake has completed and transport messages flow.
    pub fn is_handshake_finished(&self) -> bool {
        self.transport.is_some()
    }

    /// The Noise handshake hash, available once the handshake completes.
    /// Equal on both peers; usable as a channel-binding value.
    pub fn handshake_hash(&self) -> Option<&[u8]> {
        self.handshake_hash.as_deref()
    }

    /// Poison the session after an external failure (stream error,
    /// cancelled I/O). Every subsequent operation fails `InvalidOperation`.
    pub fn fail(&mut self) {
        self.phase = Phase::Failed;
    }

    // ----- reinitialization ------------------------------------------------

    /// Server-side: accept the initiator's protocol.
    pub fn accept(
        &mut self,
        protocol: NoiseProtocol,
        config: HandshakeConfig,
    ) -> Result<(), ProtocolError> {
        self.reinitialize(Reinit::Accept, protocol, config)
    }

    /// Install a switched protocol. The server becomes the initiator of the
    /// new handshake; the client its responder.
    pub fn switch(
        &mut self,
        protocol: NoiseProtocol,
        config: HandshakeConfig,
    ) -> Result<(), ProtocolError> {
        self.reinitialize(Reinit::Switch, protocol, config)
    }

    /// Install a retry protocol. The client initiates again from scratch;
    /// the server responds.
    pub fn retry(
        &mut self,
        protocol: NoiseProtocol,
        config: HandshakeConfig,
    ) -> Result<(), ProtocolError> {
        self.reinitialize(Reinit::Retry, protocol, config)
    }

    fn reinitialize(
        &mut self,
        kind: Reinit,
        protocol: NoiseProtocol,
        config: HandshakeConfig,
    ) -> Result<(), ProtocolError> {
        if !matches!(self.phase, Phase::Handshake(_)) || self.reinitialized {
            return Err(ProtocolError::InvalidOperation);
        }

        let required = match (self.side, kind) {
            (Side::Server, Reinit::Accept) => Role::Responder,
            (Side::Client, Reinit::Switch) => Role::Responder,
            (Side::Server, Reinit::Switch) => Role::Initiator,
            (Side::Client, Reinit::Retry) => Role::Initiator,
            (Side::Server, Reinit::Retry) => Role::Responder,
            (Side::Client, Reinit::Accept) => return Err(ProtocolError::InvalidOperation),
        };
        if config.role() != required {
            return Err(ProtocolError::InvalidOperation);
        }

        // Drop any speculative handshake state; its keys zeroize on drop.
        // The new state is built lazily so the prologue sees the full
        // renegotiation transcript first.
        self.handshake = None;
        self.next_encrypted = protocol.first_message_is_encrypted();
        self.init_tag = match kind {
            Reinit::Accept => InitTag::Initial,
            Reinit::Switch => InitTag::Switch,
            Reinit::Retry => InitTag::Retry,
        };
        self.protocol = Some(protocol);
        self.config = Some(config);
        self.reinitialized = true;
        Ok(())
    }

    // ----- handshake operations --------------------------------------------

    /// Build one handshake wire unit: a negotiation-data packet followed by
    /// a Noise-message packet, ready for a single contiguous write.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` when a write is not the expected next operation;
    /// `TooLarge` when a field exceeds 65535; `Crypto` from the
    /// collaborator. Errors other than `InvalidOperation` poison the
    /// session.
    pub fn write_handshake_message(
        &mut self,
        negotiation_data: &[u8],
        message_body: &[u8],
        padded_length: u16,
    ) -> Result<Vec<u8>, ProtocolError> {
        self.guard(NextOp::Write)?;
        let result = self.write_handshake_inner(negotiation_data, message_body, padded_length);
        self.poison_on_failure(&result);
        result
    }

    fn write_handshake_inner(
        &mut self,
        negotiation_data: &[u8],
        message_body: &[u8],
        padded_length: u16,
    ) -> Result<Vec<u8>, ProtocolError> {
        if negotiation_data.len() > MAX_PACKET_LENGTH || message_body.len() > MAX_PACKET_LENGTH {
            return Err(ProtocolError::TooLarge);
        }

        if let Some(transcript) = &mut self.transcript {
            transcript.record(negotiation_data);
        }
        self.ensure_handshake()?;

        let encrypted = self.next_encrypted;
        let handshake = self
            .handshake
            .as_mut()
            .ok_or(ProtocolError::InvalidOperation)?;
        let noise_message = if encrypted {
            let total = padded_total(message_body.len(), padded_length);
            if total + TAG_SIZE > MAX_PACKET_LENGTH {
                return Err(ProtocolError::TooLarge);
            }
            let plaintext = encode_padded(message_body, padded_length);
            handshake.write_message(&plaintext)?
        } else {
            // No symmetric key yet: the body goes to Noise verbatim and the
            // padded length is ignored.
            handshake.write_message(message_body)?
        };
        if noise_message.len() > MAX_PACKET_LENGTH {
            return Err(ProtocolError::TooLarge);
        }

        if let Some(transcript) = &mut self.transcript {
            transcript.record(&noise_message);
        }
        if !noise_message.is_empty() {
            self.next_encrypted = true;
        }

        let mut unit =
            Vec::with_capacity(2 * LENGTH_PREFIX_SIZE + negotiation_data.len() + noise_message.len());
        append_packet(&mut unit, negotiation_data)?;
        append_packet(&mut unit, &noise_message)?;

        if self.handshake.as_ref().is_some_and(NoiseHandshake::is_finished) {
            self.finish_handshake()?;
        } else {
            self.phase = Phase::Handshake(NextOp::ReadNegotiation);
        }

        Ok(unit)
    }

    /// Build a wire unit with negotiation data and a zero-length Noise
    /// message. No cryptographic call is made; used by the server to carry
    /// a Switch or Retry request.
    pub fn write_empty_handshake_message(
        &mut self,
        negotiation_data: &[u8],
    ) -> Result<Vec<u8>, ProtocolError> {
        self.guard(NextOp::Write)?;
        let result = self.write_empty_inner(negotiation_data);
        self.poison_on_failure(&result);
        result
    }

    fn write_empty_inner(&mut self, negotiation_data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        if negotiation_data.len() > MAX_PACKET_LENGTH {
            return Err(ProtocolError::TooLarge);
        }

        if let Some(transcript) = &mut self.transcript {
            transcript.record(negotiation_data);
            transcript.record(&[]);
        }

        let mut unit = Vec::with_capacity(2 * LENGTH_PREFIX_SIZE + negotiation_data.len());
        append_packet(&mut unit, negotiation_data)?;
        append_packet(&mut unit, &[])?;

        // An empty message does not flip the encryption flag.
        self.phase = Phase::Handshake(NextOp::ReadNegotiation);
        Ok(unit)
    }

    /// Consume one negotiation-data packet. The value is always a
    /// (possibly empty) byte vector, never absent.
    pub fn read_negotiation_data(&mut self, packet: Vec<u8>) -> Result<Vec<u8>, ProtocolError> {
        self.guard(NextOp::ReadNegotiation)?;
        if let Some(transcript) = &mut self.transcript {
            transcript.record(&packet);
        }
        self.phase = Phase::Handshake(NextOp::ReadMessage);
        Ok(packet)
    }

    /// Consume one Noise-message packet, returning the handshake payload.
    ///
    /// A zero-length packet short-circuits to an empty payload with no
    /// cryptographic call.
    ///
    /// # Errors
    ///
    /// `Crypto` on authentication failure — recoverable via
    /// [`Session::switch`] while the session has not yet been
    /// reinitialized; terminal otherwise. `Malformed` when the decrypted
    /// structure is inconsistent.
    pub fn read_handshake_message(
        &mut self,
        packet: Vec<u8>,
    ) -> Result<Zeroizing<Vec<u8>>, ProtocolError> {
        self.guard(NextOp::ReadMessage)?;
        let result = self.read_handshake_inner(&packet);
        match &result {
            Ok(_) | Err(ProtocolError::InvalidOperation) => {}
            Err(ProtocolError::Crypto) if !self.reinitialized => {
                // The Switch window: the slot is consumed (the peer's bytes
                // were read and recorded), the session stays usable.
                self.phase = Phase::Handshake(NextOp::Write);
            }
            Err(_) => self.phase = Phase::Failed,
        }
        result
    }

    fn read_handshake_inner(
        &mut self,
        packet: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, ProtocolError> {
        // Construction precedes recording: the packet that instantiates the
        // handshake state is the first one past the prologue.
        self.ensure_handshake()?;
        if let Some(transcript) = &mut self.transcript {
            transcript.record(packet);
        }

        if packet.is_empty() {
            self.phase = Phase::Handshake(NextOp::Write);
            return Ok(Zeroizing::new(Vec::new()));
        }

        let encrypted = self.next_encrypted;
        let handshake = self
            .handshake
            .as_mut()
            .ok_or(ProtocolError::InvalidOperation)?;
        let plaintext = handshake.read_message(packet)?;
        self.next_encrypted = true;

        if self.handshake.as_ref().is_some_and(NoiseHandshake::is_finished) {
            self.finish_handshake()?;
        } else {
            self.phase = Phase::Handshake(NextOp::Write);
        }

        if encrypted {
            decode_padded(&plaintext)
        } else {
            Ok(plaintext)
        }
    }

    /// Consume one Noise-message packet without a cryptographic call. The
    /// raw bytes still count toward the prologue of a renegotiated
    /// handshake — this is how a Switch/Retry receiver drops a message
    /// encrypted under the superseded protocol.
    pub fn ignore_handshake_message(&mut self, packet: Vec<u8>) -> Result<(), ProtocolError> {
        self.guard(NextOp::ReadMessage)?;
        if let Some(transcript) = &mut self.transcript {
            transcript.record(&packet);
        }
        self.phase = Phase::Handshake(NextOp::Write);
        Ok(())
    }

    fn ensure_handshake(&mut self) -> Result<(), ProtocolError> {
        if self.handshake.is_some() {
            return Ok(());
        }
        let protocol = self
            .protocol
            .as_ref()
            .ok_or(ProtocolError::InvalidOperation)?;
        let config = self.config.as_ref().ok_or(ProtocolError::InvalidOperation)?;
        let transcript = self
            .transcript
            .as_ref()
            .ok_or(ProtocolError::InvalidOperation)?;

        let prologue = transcript.build(self.init_tag, &config.prologue)?;
        self.handshake = Some(NoiseHandshake::new(protocol, config, &prologue)?);

        // Once the post-reinitialization state exists the prologue is
        // frozen; before that the transcript keeps recording, because a
        // Switch or Retry may still need the initial messages.
        if self.reinitialized {
            self.transcript = None;
        }
        Ok(())
    }

    fn finish_handshake(&mut self) -> Result<(), ProtocolError> {
        let handshake = self
            .handshake
            .take()
            .ok_or(ProtocolError::InvalidOperation)?;
        let (hash, transport) = handshake.into_transport()?;
        self.handshake_hash = Some(hash);
        self.transport = Some(transport);
        self.transcript = None;
        self.phase = Phase::Transport;
        Ok(())
    }

    // ----- transport operations --------------------------------------------

    /// Build one transport wire unit: `be16(C) || ciphertext`, where the
    /// ciphertext covers `be16(len(body)) || body || padding`.
    pub fn write_transport_message(
        &mut self,
        body: &[u8],
        padded_length: u16,
    ) -> Result<Vec<u8>, ProtocolError> {
        if !matches!(self.phase, Phase::Transport) {
            return Err(ProtocolError::InvalidOperation);
        }
        let result = self.write_transport_inner(body, padded_length);
        self.poison_on_failure(&result);
        result
    }

    fn write_transport_inner(
        &mut self,
        body: &[u8],
        padded_length: u16,
    ) -> Result<Vec<u8>, ProtocolError> {
        if body.len() > MAX_PACKET_LENGTH {
            return Err(ProtocolError::TooLarge);
        }
        let total = padded_total(body.len(), padded_length);
        if LENGTH_PREFIX_SIZE + total + TAG_SIZE > MAX_PACKET_LENGTH {
            return Err(ProtocolError::TooLarge);
        }

        let plaintext = encode_padded(body, padded_length);
        let transport = self
            .transport
            .as_mut()
            .ok_or(ProtocolError::InvalidOperation)?;
        let ciphertext = transport.encrypt(&plaintext)?;

        let mut unit = Vec::with_capacity(LENGTH_PREFIX_SIZE + ciphertext.len());
        append_packet(&mut unit, &ciphertext)?;
        Ok(unit)
    }

    /// Consume one transport packet, returning the unpadded body.
    pub fn read_transport_message(
        &mut self,
        packet: Vec<u8>,
    ) -> Result<Zeroizing<Vec<u8>>, ProtocolError> {
        if !matches!(self.phase, Phase::Transport) {
            return Err(ProtocolError::InvalidOperation);
        }
        let result = self.read_transport_inner(&packet);
        self.poison_on_failure(&result);
        result
    }

    fn read_transport_inner(
        &mut self,
        packet: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, ProtocolError> {
        if packet.len() < LENGTH_PREFIX_SIZE + TAG_SIZE {
            return Err(ProtocolError::Malformed);
        }
        let transport = self
            .transport
            .as_mut()
            .ok_or(ProtocolError::InvalidOperation)?;
        let plaintext = transport.decrypt(packet)?;
        decode_padded(&plaintext)
    }

    // ----- shared helpers --------------------------------------------------

    fn guard(&self, op: NextOp) -> Result<(), ProtocolError> {
        match &self.phase {
            Phase::Handshake(next) if *next == op => Ok(()),
            _ => Err(ProtocolError::InvalidOperation),
        }
    }

    fn poison_on_failure<T>(&mut self, result: &Result<T, ProtocolError>) {
        match result {
            Ok(_) | Err(ProtocolError::InvalidOperation) => {}
            Err(_) => self.phase = Phase::Failed,
        }
    }

    #[cfg(test)]
    fn transcript_len(&self) -> Option<usize> {
        self.transcript.as_ref().map(Transcript::len)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("side", &self.side)
            .field("protocol", &self.protocol_name())
            .field("phase", &self.phase)
            .field("reinitialized", &self.reinitialized)
            .finish()
    }
}

/// Padded plaintext length: the 2-byte inner length, the body, and enough
/// zeros to reach `padded_length`.
fn padded_total(body_len: usize, padded_length: u16) -> usize {
    (body_len + LENGTH_PREFIX_SIZE).max(padded_length as usize)
}

fn encode_padded(body: &[u8], padded_length: u16) -> Zeroizing<Vec<u8>> {
    let total = padded_total(body.len(), padded_length);
    let mut plaintext = Zeroizing::new(vec![0u8; total]);

    // Cast is safe: callers bound body.len() by MAX_PACKET_LENGTH.
    #[allow(clippy::cast_possible_truncation)]
    let prefix = (body.len() as u16).to_be_bytes();
    plaintext[..LENGTH_PREFIX_SIZE].copy_from_slice(&prefix);
    plaintext[LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + body.len()].copy_from_slice(body);
    plaintext
}

fn decode_padded(plaintext: &[u8]) -> Result<Zeroizing<Vec<u8>>, ProtocolError> {
    if plaintext.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Malformed);
    }
    let body_len = read_length([plaintext[0], plaintext[1]]);
    if body_len > plaintext.len() - LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Malformed);
    }
    Ok(Zeroizing::new(
        plaintext[LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + body_len].to_vec(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const XX: &str = "Noise_XX_25519_AESGCM_BLAKE2b";
    const NN: &str = "Noise_NN_25519_AESGCM_BLAKE2b";
    const IK: &str = "Noise_IK_25519_AESGCM_BLAKE2b";

    const CLIENT_STATIC_PRIV: &str =
        "e61ef9919cde45dd5f82166404bd08e38bceb5dfdfded0a34c8df7ed542214d1";
    const SERVER_STATIC_PRIV: &str =
        "4a3acbfdb163dec651dfa3194dece676d437029c62a408b4c5ea9114246e4893";
    const CLIENT_STATIC_PUB: &str =
        "6bc3822a2aa7f4e6981d6538692b3cdf3e6df9eea6ed269eb41d93c22757b75a";
    const SERVER_STATIC_PUB: &str =
        "31e0303fd6418d2f8c0e78b91f22e8caed0fbe48656dcf4767e4834f701b8f62";

    const PROLOGUE: &[u8] = b"John Galt";
    const NEGOTIATION: &[u8] = b"NoiseSocket";

    const PAYLOADS: [&str; 6] = [
        "Ludwig von Mises",
        "Murray Rothbard",
        "F. A. Hayek",
        "Carl Menger",
        "Jean-Baptiste Say",
        "Eugen B\u{f6}hm von Bawerk",
    ];

    fn protocol(name: &str) -> NoiseProtocol {
        NoiseProtocol::new(name).unwrap()
    }

    fn key(hex_str: &str) -> Vec<u8> {
        hex::decode(hex_str).unwrap()
    }

    fn client_config() -> HandshakeConfig {
        HandshakeConfig::initiator()
            .with_prologue(PROLOGUE)
            .with_local_static(&key(CLIENT_STATIC_PRIV))
    }

    fn server_config() -> HandshakeConfig {
        HandshakeConfig::responder()
            .with_prologue(PROLOGUE)
            .with_local_static(&key(SERVER_STATIC_PRIV))
    }

    /// Split a handshake wire unit into its two packet bodies.
    fn split_unit(unit: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let neg_len = read_length([unit[0], unit[1]]);
        let neg = unit[2..2 + neg_len].to_vec();
        let rest = &unit[2 + neg_len..];
        let msg_len = read_length([rest[0], rest[1]]);
        assert_eq!(rest.len(), 2 + msg_len, "trailing bytes in wire unit");
        (neg, rest[2..].to_vec())
    }

    /// Strip the outer length prefix from a transport wire unit.
    fn transport_packet(unit: &[u8]) -> Vec<u8> {
        let len = read_length([unit[0], unit[1]]);
        assert_eq!(unit.len(), 2 + len);
        unit[2..].to_vec()
    }

    /// Feed one client wire unit to the server: read negotiation, then the
    /// Noise message.
    fn deliver(to: &mut Session, unit: &[u8]) -> Zeroizing<Vec<u8>> {
        let (neg, msg) = split_unit(unit);
        to.read_negotiation_data(neg).unwrap();
        to.read_handshake_message(msg).unwrap()
    }

    fn accepted_pair(padded: u16) -> (Session, Session) {
        let mut client = Session::new_client(protocol(XX), client_config()).unwrap();
        let mut server = Session::new_server();

        let m1 = client
            .write_handshake_message(NEGOTIATION, b"", padded)
            .unwrap();
        let (neg, msg) = split_unit(&m1);
        let seen = server.read_negotiation_data(neg).unwrap();
        assert_eq!(seen, NEGOTIATION);
        server.accept(protocol(XX), server_config()).unwrap();
        server.read_handshake_message(msg).unwrap();

        let m2 = server.write_handshake_message(b"", b"", padded).unwrap();
        deliver(&mut client, &m2);
        let m3 = client.write_handshake_message(b"", b"", padded).unwrap();
        deliver(&mut server, &m3);

        assert!(client.is_handshake_finished());
        assert!(server.is_handshake_finished());
        (client, server)
    }

    #[test]
    fn test_accept_flow_and_payload_exchange() {
        let (mut client, mut server) = accepted_pair(0);

        assert_eq!(client.handshake_hash(), server.handshake_hash());
        assert!(client.handshake_hash().is_some());

        // Six payloads, alternating direction starting with the client.
        for (i, payload) in PAYLOADS.iter().enumerate() {
            let (from, to) = if i % 2 == 0 {
                (&mut client, &mut server)
            } else {
                (&mut server, &mut client)
            };
            let unit = from.write_transport_message(payload.as_bytes(), 0).unwrap();
            let body = to.read_transport_message(transport_packet(&unit)).unwrap();
            assert_eq!(&body[..], payload.as_bytes());
        }
    }

    #[test]
    fn test_transcript_freezes_on_completion() {
        let (client, server) = accepted_pair(0);
        assert_eq!(client.transcript_len(), None);
        assert_eq!(server.transcript_len(), None);
    }

    #[test]
    fn test_accept_prologue_sees_one_message() {
        // The server's handshake state is built right after Accept, from a
        // transcript holding only the initial negotiation data; the
        // transcript freezes at that point.
        let mut client = Session::new_client(protocol(XX), client_config()).unwrap();
        let mut server = Session::new_server();

        let m1 = client.write_handshake_message(NEGOTIATION, b"", 0).unwrap();
        // Client keeps recording: negotiation data plus its own noise
        // message, in case the server switches or retries.
        assert_eq!(client.transcript_len(), Some(2));

        let (neg, msg) = split_unit(&m1);
        server.read_negotiation_data(neg).unwrap();
        assert_eq!(server.transcript_len(), Some(1));
        server.accept(protocol(XX), server_config()).unwrap();
        server.read_handshake_message(msg).unwrap();
        assert_eq!(server.transcript_len(), None);
    }

    #[test]
    fn test_padded_messages_meet_floor() {
        let (mut client, mut server) = accepted_pair(32);

        for payload in ["hi", "Ludwig von Mises"] {
            let unit = client
                .write_transport_message(payload.as_bytes(), 32)
                .unwrap();
            let outer = read_length([unit[0], unit[1]]);
            assert!(outer >= 32 + TAG_SIZE, "outer {outer} below padded floor");
            let body = server.read_transport_message(transport_packet(&unit)).unwrap();
            assert_eq!(&body[..], payload.as_bytes());
        }
    }

    #[test]
    fn test_padding_lower_bound_law() {
        let (mut client, mut server) = accepted_pair(0);

        // padded_length >= len + 2: outer length is exactly padded + tag.
        let unit = client.write_transport_message(b"abc", 64).unwrap();
        assert_eq!(read_length([unit[0], unit[1]]), 64 + TAG_SIZE);
        let body = server.read_transport_message(transport_packet(&unit)).unwrap();
        assert_eq!(&body[..], b"abc");

        // padded_length below the minimum: outer length is len + 2 + tag.
        let unit = client.write_transport_message(b"abcdef", 3).unwrap();
        assert_eq!(read_length([unit[0], unit[1]]), 6 + 2 + TAG_SIZE);
        let body = server.read_transport_message(transport_packet(&unit)).unwrap();
        assert_eq!(&body[..], b"abcdef");
    }

    #[test]
    fn test_switch_flow() {
        // Client offers NN; the server installs XX instead and initiates.
        let mut client = Session::new_client(protocol(NN), HandshakeConfig::initiator()).unwrap();
        let mut server = Session::new_server();

        let m1 = client.write_handshake_message(NEGOTIATION, b"", 0).unwrap();
        let (neg, msg) = split_unit(&m1);
        server.read_negotiation_data(neg).unwrap();
        server
            .switch(
                protocol(XX),
                HandshakeConfig::initiator()
                    .with_prologue(PROLOGUE)
                    .with_local_static(&key(SERVER_STATIC_PRIV)),
            )
            .unwrap();
        server.ignore_handshake_message(msg).unwrap();
        // Initial negotiation data plus the ignored noise message.
        assert_eq!(server.transcript_len(), Some(2));

        let m2 = server.write_handshake_message(b"switched", b"", 0).unwrap();
        // The switched handshake state exists now; its prologue saw three
        // messages and the transcript is frozen.
        assert_eq!(server.transcript_len(), None);

        let (neg2, msg2) = split_unit(&m2);
        let seen = client.read_negotiation_data(neg2).unwrap();
        assert_eq!(seen, b"switched");
        assert_eq!(client.transcript_len(), Some(3));
        client
            .switch(
                protocol(XX),
                HandshakeConfig::responder()
                    .with_prologue(PROLOGUE)
                    .with_local_static(&key(CLIENT_STATIC_PRIV)),
            )
            .unwrap();
        client.read_handshake_message(msg2).unwrap();
        assert_eq!(client.transcript_len(), None);

        // Finish XX: client responds, server closes.
        let m3 = client.write_handshake_message(b"", b"", 0).unwrap();
        deliver(&mut server, &m3);
        let m4 = server.write_handshake_message(b"", b"", 0).unwrap();
        deliver(&mut client, &m4);

        assert!(client.is_handshake_finished());
        assert_eq!(client.handshake_hash(), server.handshake_hash());

        let unit = server.write_transport_message(PAYLOADS[0].as_bytes(), 0).unwrap();
        let body = client.read_transport_message(transport_packet(&unit)).unwrap();
        assert_eq!(&body[..], PAYLOADS[0].as_bytes());
    }

    #[test]
    fn test_retry_flow() {
        // Client offers NN; the server asks it to retry with XX.
        let mut client = Session::new_client(protocol(NN), HandshakeConfig::initiator()).unwrap();
        let mut server = Session::new_server();

        let m1 = client.write_handshake_message(NEGOTIATION, b"", 0).unwrap();
        let (neg, msg) = split_unit(&m1);
        server.read_negotiation_data(neg).unwrap();
        server.retry(protocol(XX), server_config()).unwrap();
        server.ignore_handshake_message(msg).unwrap();

        let m2 = server.write_empty_handshake_message(b"retry-with-xx").unwrap();
        // Four slots so far: neg, noise, retry neg, empty noise.
        assert_eq!(server.transcript_len(), Some(4));

        let (neg2, msg2) = split_unit(&m2);
        assert!(msg2.is_empty());
        let seen = client.read_negotiation_data(neg2).unwrap();
        assert_eq!(seen, b"retry-with-xx");
        let body = client.read_handshake_message(msg2).unwrap();
        assert!(body.is_empty());
        assert_eq!(client.transcript_len(), Some(4));

        client.retry(protocol(XX), client_config()).unwrap();
        let m3 = client.write_handshake_message(NEGOTIATION, b"", 0).unwrap();
        // Fifth slot (the retry negotiation data) froze the prologue.
        assert_eq!(client.transcript_len(), None);

        let (neg3, msg3) = split_unit(&m3);
        server.read_negotiation_data(neg3).unwrap();
        assert_eq!(server.transcript_len(), Some(5));
        server.read_handshake_message(msg3).unwrap();
        assert_eq!(server.transcript_len(), None);

        let m4 = server.write_handshake_message(b"", b"", 0).unwrap();
        deliver(&mut client, &m4);
        let m5 = client.write_handshake_message(b"", b"", 0).unwrap();
        deliver(&mut server, &m5);

        assert!(client.is_handshake_finished());
        assert_eq!(client.handshake_hash(), server.handshake_hash());
    }

    #[test]
    fn test_speculative_server_completes_ik() {
        // IK's first payload is already encrypted, and a server holding the
        // right speculative protocol completes without any reinitialization.
        let mut client = Session::new_client(
            protocol(IK),
            client_config().with_remote_static(&key(SERVER_STATIC_PUB)),
        )
        .unwrap();
        let mut server =
            Session::new_server_with_protocol(protocol(IK), server_config()).unwrap();

        let m1 = client
            .write_handshake_message(NEGOTIATION, b"client hello", 0)
            .unwrap();
        let (neg, msg) = split_unit(&m1);
        server.read_negotiation_data(neg).unwrap();
        let body = server.read_handshake_message(msg).unwrap();
        assert_eq!(&body[..], b"client hello");

        let m2 = server.write_handshake_message(b"", b"", 0).unwrap();
        deliver(&mut client, &m2);

        assert!(client.is_handshake_finished());
        assert!(server.is_handshake_finished());
        assert_eq!(client.handshake_hash(), server.handshake_hash());
    }

    #[test]
    fn test_crypto_failure_then_switch() {
        // Client runs IK against the wrong remote static; the server's
        // speculative decrypt fails and it switches to XX.
        let mut client = Session::new_client(
            protocol(IK),
            client_config().with_remote_static(&key(CLIENT_STATIC_PUB)),
        )
        .unwrap();
        let mut server =
            Session::new_server_with_protocol(protocol(IK), server_config()).unwrap();

        let m1 = client.write_handshake_message(NEGOTIATION, b"", 0).unwrap();
        let (neg, msg) = split_unit(&m1);
        server.read_negotiation_data(neg).unwrap();
        let err = server.read_handshake_message(msg).unwrap_err();
        assert_eq!(err, ProtocolError::Crypto);

        // The failed message still counts toward the new prologue.
        assert_eq!(server.transcript_len(), Some(2));
        server
            .switch(
                protocol(XX),
                HandshakeConfig::initiator()
                    .with_prologue(PROLOGUE)
                    .with_local_static(&key(SERVER_STATIC_PRIV)),
            )
            .unwrap();

        let m2 = server.write_handshake_message(b"fallback", b"", 0).unwrap();
        let (neg2, msg2) = split_unit(&m2);
        client.read_negotiation_data(neg2).unwrap();
        client
            .switch(
                protocol(XX),
                HandshakeConfig::responder()
                    .with_prologue(PROLOGUE)
                    .with_local_static(&key(CLIENT_STATIC_PRIV)),
            )
            .unwrap();
        client.read_handshake_message(msg2).unwrap();

        let m3 = client.write_handshake_message(b"", b"", 0).unwrap();
        deliver(&mut server, &m3);
        let m4 = server.write_handshake_message(b"", b"", 0).unwrap();
        deliver(&mut client, &m4);

        assert_eq!(client.handshake_hash(), server.handshake_hash());

        let unit = client.write_transport_message(PAYLOADS[1].as_bytes(), 0).unwrap();
        let body = server.read_transport_message(transport_packet(&unit)).unwrap();
        assert_eq!(&body[..], PAYLOADS[1].as_bytes());
    }

    #[test]
    fn test_out_of_order_calls() {
        let mut client = Session::new_client(protocol(XX), client_config()).unwrap();

        // A client must write before it reads.
        assert_eq!(
            client.read_handshake_message(vec![1, 2, 3]).unwrap_err(),
            ProtocolError::InvalidOperation
        );
        assert_eq!(
            client.read_negotiation_data(Vec::new()).unwrap_err(),
            ProtocolError::InvalidOperation
        );

        // The rejection left the session untouched.
        assert!(client.write_handshake_message(NEGOTIATION, b"", 0).is_ok());

        // Two writes in a row are equally illegal.
        assert_eq!(
            client.write_handshake_message(b"", b"", 0).unwrap_err(),
            ProtocolError::InvalidOperation
        );
    }

    #[test]
    fn test_server_must_reinitialize_before_crypto() {
        let mut client = Session::new_client(protocol(XX), client_config()).unwrap();
        let mut server = Session::new_server();

        let m1 = client.write_handshake_message(NEGOTIATION, b"", 0).unwrap();
        let (neg, msg) = split_unit(&m1);
        server.read_negotiation_data(neg).unwrap();

        // No protocol installed yet.
        assert_eq!(
            server.read_handshake_message(msg.clone()).unwrap_err(),
            ProtocolError::InvalidOperation
        );

        // Accept and retry the same packet.
        server.accept(protocol(XX), server_config()).unwrap();
        assert!(server.read_handshake_message(msg).is_ok());
    }

    #[test]
    fn test_second_reinitialization_fails() {
        let mut server = Session::new_server();
        server.accept(protocol(XX), server_config()).unwrap();

        assert_eq!(
            server.accept(protocol(XX), server_config()).unwrap_err(),
            ProtocolError::InvalidOperation
        );
        assert_eq!(
            server
                .switch(
                    protocol(XX),
                    HandshakeConfig::initiator().with_local_static(&key(SERVER_STATIC_PRIV)),
                )
                .unwrap_err(),
            ProtocolError::InvalidOperation
        );
        assert_eq!(
            server.retry(protocol(XX), server_config()).unwrap_err(),
            ProtocolError::InvalidOperation
        );
    }

    #[test]
    fn test_role_matrix() {
        // A client never accepts.
        let mut client = Session::new_client(protocol(XX), client_config()).unwrap();
        assert_eq!(
            client.accept(protocol(XX), server_config()).unwrap_err(),
            ProtocolError::InvalidOperation
        );
        // A switching client must become the responder.
        assert_eq!(
            client.switch(protocol(XX), client_config()).unwrap_err(),
            ProtocolError::InvalidOperation
        );
        // A retrying client must stay the initiator.
        assert_eq!(
            client.retry(protocol(XX), server_config()).unwrap_err(),
            ProtocolError::InvalidOperation
        );

        // A switching server must become the initiator.
        let mut server = Session::new_server();
        assert_eq!(
            server.switch(protocol(XX), server_config()).unwrap_err(),
            ProtocolError::InvalidOperation
        );
        // A retrying server must stay the responder.
        assert_eq!(
            server
                .retry(
                    protocol(XX),
                    HandshakeConfig::initiator().with_local_static(&key(SERVER_STATIC_PRIV)),
                )
                .unwrap_err(),
            ProtocolError::InvalidOperation
        );
    }

    #[test]
    fn test_constructor_role_validation() {
        assert_eq!(
            Session::new_client(protocol(XX), server_config()).unwrap_err(),
            ProtocolError::InvalidArgument
        );
        assert_eq!(
            Session::new_server_with_protocol(protocol(XX), client_config()).unwrap_err(),
            ProtocolError::InvalidArgument
        );
    }

    #[test]
    fn test_phase_boundaries() {
        let mut client = Session::new_client(protocol(XX), client_config()).unwrap();

        // Transport calls before completion.
        assert_eq!(
            client.write_transport_message(b"early", 0).unwrap_err(),
            ProtocolError::InvalidOperation
        );
        assert_eq!(
            client.read_transport_message(vec![0u8; 64]).unwrap_err(),
            ProtocolError::InvalidOperation
        );
        assert!(client.handshake_hash().is_none());

        let (mut client, mut server) = accepted_pair(0);

        // Handshake calls after completion.
        assert_eq!(
            client.write_handshake_message(b"", b"", 0).unwrap_err(),
            ProtocolError::InvalidOperation
        );
        assert_eq!(
            server.read_negotiation_data(Vec::new()).unwrap_err(),
            ProtocolError::InvalidOperation
        );
        assert_eq!(
            server.ignore_handshake_message(Vec::new()).unwrap_err(),
            ProtocolError::InvalidOperation
        );
        // Reinitialization after completion.
        assert_eq!(
            server.accept(protocol(XX), server_config()).unwrap_err(),
            ProtocolError::InvalidOperation
        );
    }

    #[test]
    fn test_tampered_transport_message() {
        let (mut client, mut server) = accepted_pair(0);

        let unit = client.write_transport_message(b"secret", 0).unwrap();
        let mut packet = transport_packet(&unit);
        packet[0] ^= 0x80;

        assert_eq!(
            server.read_transport_message(packet).unwrap_err(),
            ProtocolError::Crypto
        );
        // A transport-phase crypto failure is terminal.
        assert_eq!(
            server.read_transport_message(vec![0u8; 64]).unwrap_err(),
            ProtocolError::InvalidOperation
        );
    }

    #[test]
    fn test_undersized_transport_packet() {
        let (_, mut server) = accepted_pair(0);
        assert_eq!(
            server.read_transport_message(Vec::new()).unwrap_err(),
            ProtocolError::Malformed
        );

        let (_, mut server) = accepted_pair(0);
        assert_eq!(
            server
                .read_transport_message(vec![0u8; LENGTH_PREFIX_SIZE + TAG_SIZE - 1])
                .unwrap_err(),
            ProtocolError::Malformed
        );
    }

    #[test]
    fn test_oversized_transport_body() {
        let (mut client, _) = accepted_pair(0);
        let body = vec![0u8; MAX_PACKET_LENGTH];
        assert_eq!(
            client.write_transport_message(&body, 0).unwrap_err(),
            ProtocolError::TooLarge
        );
    }

    #[test]
    fn test_empty_negotiation_data_is_empty_vec() {
        let mut client = Session::new_client(protocol(XX), client_config()).unwrap();
        let mut server = Session::new_server();

        let m1 = client.write_handshake_message(b"", b"", 0).unwrap();
        let (neg, _) = split_unit(&m1);
        assert!(neg.is_empty());
        let seen = server.read_negotiation_data(neg).unwrap();
        assert!(seen.is_empty());
    }

    #[test]
    fn test_empty_handshake_unit_layout() {
        let mut server = Session::new_server();
        let mut client = Session::new_client(protocol(NN), HandshakeConfig::initiator()).unwrap();

        let m1 = client.write_handshake_message(b"", b"", 0).unwrap();
        let (neg, msg) = split_unit(&m1);
        server.read_negotiation_data(neg).unwrap();
        server.retry(protocol(XX), server_config()).unwrap();
        server.ignore_handshake_message(msg).unwrap();

        let unit = server.write_empty_handshake_message(b"nd").unwrap();
        assert_eq!(unit, &[0x00, 0x02, b'n', b'd', 0x00, 0x00]);
    }

    #[test]
    fn test_handshake_payload_roundtrip_with_padding() {
        // XX message 2 carries the first encrypted payload; assert the body
        // survives the pad-and-strip cycle.
        let mut client = Session::new_client(protocol(XX), client_config()).unwrap();
        let mut server = Session::new_server();

        let m1 = client.write_handshake_message(NEGOTIATION, b"", 0).unwrap();
        let (neg, msg) = split_unit(&m1);
        server.read_negotiation_data(neg).unwrap();
        server.accept(protocol(XX), server_config()).unwrap();
        server.read_handshake_message(msg).unwrap();

        let m2 = server
            .write_handshake_message(b"", b"server hello", 128)
            .unwrap();
        let (neg2, msg2) = split_unit(&m2);
        // Padded payload of 128 plus the AEAD tag, under the key material.
        assert!(msg2.len() >= 128 + TAG_SIZE);

        client.read_negotiation_data(neg2).unwrap();
        let body = client.read_handshake_message(msg2).unwrap();
        assert_eq!(&body[..], b"server hello");
    }
}
