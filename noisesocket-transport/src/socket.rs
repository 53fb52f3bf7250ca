//! The NoiseSocket façade.
//!
//! [`NoiseSocket`] drives a `noisesocket-core` session over any
//! `AsyncRead + AsyncWrite` byte stream: it moves whole wire units (the
//! session engine assembles and consumes them) and owns the failure
//! bookkeeping around the stream.
//!
//! # Cancellation
//!
//! Dropping an in-flight future is the cancellation signal. The socket
//! tracks whether a call is in flight; if a call begins while the previous
//! one never finished, the stream position is unknown and the socket is
//! unusable — every subsequent operation fails [`SocketError::Cancelled`].
//! Deadlines compose externally via `tokio::time::timeout`.
//!
//! # Concurrency
//!
//! A socket is a sequentially-accessed object: every operation takes
//! `&mut self`, so no two calls overlap. Independent sockets are fully
//! parallel.

use std::fmt;

use noisesocket_core::{HandshakeConfig, NoiseProtocol, Session, Side};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::SocketError;
use crate::message::Message;
use crate::wire;

/// A NoiseSocket connection over a byte stream `S`.
pub struct NoiseSocket<S> {
    stream: S,
    session: Session,
    leave_open: bool,
    in_flight: bool,
}

impl<S> NoiseSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a client committed to an initial protocol. The client
    /// initiates the initial handshake.
    ///
    /// With `leave_open`, [`NoiseSocket::close`] leaves the stream open for
    /// the caller; otherwise it is shut down.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` unless the configuration's role is `Initiator`.
    pub fn client(
        protocol: NoiseProtocol,
        config: HandshakeConfig,
        stream: S,
        leave_open: bool,
    ) -> Result<Self, SocketError> {
        Ok(Self::from_session(
            Session::new_client(protocol, config)?,
            stream,
            leave_open,
        ))
    }

    /// Create a server with no protocol. It must [`NoiseSocket::accept`],
    /// [`NoiseSocket::switch`] or [`NoiseSocket::retry`] after reading the
    /// first negotiation data.
    pub fn server(stream: S, leave_open: bool) -> Self {
        Self::from_session(Session::new_server(), stream, leave_open)
    }

    /// Create a server holding a speculative default protocol, allowing it
    /// to attempt the first handshake read before deciding whether to
    /// reinitialize.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` unless the configuration's role is `Responder`.
    pub fn server_with_protocol(
        protocol: NoiseProtocol,
        config: HandshakeConfig,
        stream: S,
        leave_open: bool,
    ) -> Result<Self, SocketError> {
        Ok(Self::from_session(
            Session::new_server_with_protocol(protocol, config)?,
            stream,
            leave_open,
        ))
    }

    fn from_session(session: Session, stream: S, leave_open: bool) -> Self {
        Self {
            stream,
            session,
            leave_open,
            in_flight: false,
        }
    }

    // ----- reinitialization (no I/O, never suspends) -----------------------

    /// Server-side: accept the initiator's protocol.
    pub fn accept(
        &mut self,
        protocol: NoiseProtocol,
        config: HandshakeConfig,
    ) -> Result<(), SocketError> {
        self.ensure_usable()?;
        Ok(self.session.accept(protocol, config)?)
    }

    /// Install a switched protocol: the server becomes the initiator of the
    /// new handshake, the client its responder.
    pub fn switch(
        &mut self,
        protocol: NoiseProtocol,
        config: HandshakeConfig,
    ) -> Result<(), SocketError> {
        self.ensure_usable()?;
        Ok(self.session.switch(protocol, config)?)
    }

    /// Install a retry protocol: the client initiates again from scratch.
    pub fn retry(
        &mut self,
        protocol: NoiseProtocol,
        config: HandshakeConfig,
    ) -> Result<(), SocketError> {
        self.ensure_usable()?;
        Ok(self.session.retry(protocol, config)?)
    }

    // ----- handshake I/O ---------------------------------------------------

    /// Write one handshake wire unit: negotiation data packet plus Noise
    /// message packet, emitted contiguously.
    pub async fn write_handshake_message(
        &mut self,
        negotiation_data: &[u8],
        message_body: &[u8],
        padded_length: u16,
    ) -> Result<(), SocketError> {
        self.begin()?;
        let result = self
            .write_handshake_inner(negotiation_data, message_body, padded_length)
            .await;
        self.finish(&result);
        result
    }

    async fn write_handshake_inner(
        &mut self,
        negotiation_data: &[u8],
        message_body: &[u8],
        padded_length: u16,
    ) -> Result<(), SocketError> {
        let unit =
            self.session
                .write_handshake_message(negotiation_data, message_body, padded_length)?;
        wire::write_unit(&mut self.stream, &unit).await
    }

    /// Write negotiation data paired with a zero-length Noise message — the
    /// server's Switch/Retry request carrier.
    pub async fn write_empty_handshake_message(
        &mut self,
        negotiation_data: &[u8],
    ) -> Result<(), SocketError> {
        self.begin()?;
        let result = self.write_empty_inner(negotiation_data).await;
        self.finish(&result);
        result
    }

    async fn write_empty_inner(&mut self, negotiation_data: &[u8]) -> Result<(), SocketError> {
        let unit = self.session.write_empty_handshake_message(negotiation_data)?;
        wire::write_unit(&mut self.stream, &unit).await
    }

    /// Read the peer's negotiation data. Always a (possibly empty) byte
    /// vector; this layer never interprets it.
    pub async fn read_negotiation_data(&mut self) -> Result<Vec<u8>, SocketError> {
        self.begin()?;
        let result = self.read_negotiation_inner().await;
        self.finish(&result);
        result
    }

    async fn read_negotiation_inner(&mut self) -> Result<Vec<u8>, SocketError> {
        let packet = wire::read_packet(&mut self.stream).await?;
        Ok(self.session.read_negotiation_data(packet)?)
    }

    /// Read one Noise handshake message, returning its payload.
    ///
    /// A `Crypto` failure here, before any reinitialization, is the
    /// documented signal to call [`NoiseSocket::switch`] and continue under
    /// a fallback protocol; see [`SocketError::is_crypto`].
    pub async fn read_handshake_message(&mut self) -> Result<Message, SocketError> {
        self.begin()?;
        let result = self.read_handshake_inner().await;
        self.finish(&result);
        result
    }

    async fn read_handshake_inner(&mut self) -> Result<Message, SocketError> {
        let packet = wire::read_packet(&mut self.stream).await?;
        let body = self.session.read_handshake_message(packet)?;
        Ok(Message::new(body))
    }

    /// Read and discard one Noise handshake message without a cryptographic
    /// call. Its raw bytes still count toward a renegotiated prologue.
    pub async fn ignore_handshake_message(&mut self) -> Result<(), SocketError> {
        self.begin()?;
        let result = self.ignore_inner().await;
        self.finish(&result);
        result
    }

    async fn ignore_inner(&mut self) -> Result<(), SocketError> {
        let packet = wire::read_packet(&mut self.stream).await?;
        Ok(self.session.ignore_handshake_message(packet)?)
    }

    // ----- transport I/O ---------------------------------------------------

    /// Encrypt and write one transport message, padded to `padded_length`.
    pub async fn write_message(
        &mut self,
        body: &[u8],
        padded_length: u16,
    ) -> Result<(), SocketError> {
        self.begin()?;
        let result = self.write_message_inner(body, padded_length).await;
        self.finish(&result);
        result
    }

    async fn write_message_inner(
        &mut self,
        body: &[u8],
        padded_length: u16,
    ) -> Result<(), SocketError> {
        let unit = self.session.write_transport_message(body, padded_length)?;
        wire::write_unit(&mut self.stream, &unit).await
    }

    /// Read and decrypt one transport message, stripping the padding.
    pub async fn read_message(&mut self) -> Result<Message, SocketError> {
        self.begin()?;
        let result = self.read_message_inner().await;
        self.finish(&result);
        result
    }

    async fn read_message_inner(&mut self) -> Result<Message, SocketError> {
        let packet = wire::read_packet(&mut self.stream).await?;
        let body = self.session.read_transport_message(packet)?;
        Ok(Message::new(body))
    }

    // ----- queries and teardown --------------------------------------------

    /// Byte-stream side.
    pub fn side(&self) -> Side {
        self.session.side()
    }

    /// Canonical name of the current protocol, if one is installed.
    pub fn protocol_name(&self) -> Option<&str> {
        self.session.protocol_name()
    }

    /// Whether the handshake has completed.
    pub fn is_handshake_finished(&self) -> bool {
        self.session.is_handshake_finished()
    }

    /// The Noise handshake hash, available once the handshake completes.
    /// Equal on both peers; usable for channel binding.
    pub fn handshake_hash(&self) -> Option<&[u8]> {
        self.session.handshake_hash()
    }

    /// Tear the socket down, shutting the stream down unless the socket was
    /// constructed with `leave_open`. Consuming `self` makes use-after-close
    /// unrepresentable; dropping the session zeroizes its key material.
    pub async fn close(mut self) -> Result<(), SocketError> {
        if !self.leave_open {
            self.stream.shutdown().await.map_err(SocketError::Stream)?;
        }
        Ok(())
    }

    /// Give the byte stream back without shutting it down.
    pub fn into_stream(self) -> S {
        self.stream
    }

    fn begin(&mut self) -> Result<(), SocketError> {
        if self.in_flight {
            // The previous call's future was dropped mid-I/O.
            self.session.fail();
            return Err(SocketError::Cancelled);
        }
        self.in_flight = true;
        Ok(())
    }

    fn finish<T>(&mut self, result: &Result<T, SocketError>) {
        self.in_flight = false;
        if matches!(result, Err(SocketError::Stream(_) | SocketError::Truncated)) {
            self.session.fail();
        }
    }

    fn ensure_usable(&self) -> Result<(), SocketError> {
        if self.in_flight {
            return Err(SocketError::Cancelled);
        }
        Ok(())
    }
}

impl<S> fmt::Debug for NoiseSocket<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoiseSocket")
            .field("session", &self.session)
            .field("leave_open", &self.leave_open)
            .field(
                "handshake_hash",
                &self.session.handshake_hash().map(hex::encode),
            )
            .finish()
    }
}
