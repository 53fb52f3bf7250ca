//! Protocol identifiers and per-handshake configuration.
//!
//! A [`NoiseProtocol`] is the immutable choice of handshake pattern, DH
//! function, cipher and hash (e.g. `Noise_XX_25519_AESGCM_BLAKE2b`). The
//! ASCII name is used for construction and test vectors only; it is never
//! placed on the wire by this library.

use std::fmt;
use std::str::FromStr;

use snow::params::{HandshakeModifier, HandshakePattern, NoiseParams};
use snow::Builder;
use zeroize::Zeroizing;

use crate::error::ProtocolError;

/// A parsed, validated Noise protocol identifier.
#[derive(Clone)]
pub struct NoiseProtocol {
    params: NoiseParams,
}

impl NoiseProtocol {
    /// Parse a protocol from its canonical ASCII name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for unparseable names and for one-way
    /// handshake patterns (`N`, `K`, `X`), which this library does not
    /// support.
    pub fn new(name: &str) -> Result<Self, ProtocolError> {
        let params: NoiseParams = name.parse().map_err(|_| ProtocolError::InvalidArgument)?;

        if params.handshake.pattern.is_oneway() {
            return Err(ProtocolError::InvalidArgument);
        }

        Ok(Self { params })
    }

    /// The canonical ASCII protocol name.
    pub fn name(&self) -> &str {
        &self.params.name
    }

    /// Whether the pattern carries any PSK modifier.
    pub(crate) fn has_psk(&self) -> bool {
        self.params
            .handshake
            .modifiers
            .list
            .iter()
            .any(|m| matches!(m, HandshakeModifier::Psk(_)))
    }

    /// PSK positions, in modifier order.
    pub(crate) fn psk_positions(&self) -> Vec<u8> {
        self.params
            .handshake
            .modifiers
            .list
            .iter()
            .filter_map(|m| match m {
                HandshakeModifier::Psk(n) => Some(*n),
                _ => None,
            })
            .collect()
    }

    fn is_fallback(&self) -> bool {
        self.params
            .handshake
            .modifiers
            .list
            .iter()
            .any(|m| matches!(m, HandshakeModifier::Fallback))
    }

    /// Whether the first handshake payload is already encrypted under this
    /// protocol, i.e. a symmetric key exists before the first payload is
    /// placed: any PSK modifier, a fallback pattern, or a first message step
    /// that performs a DH.
    ///
    /// snow does not expose pattern token lists, so the DH case is an
    /// explicit table of the patterns whose first step mixes `es`/`ss`.
    pub(crate) fn first_message_is_encrypted(&self) -> bool {
        if self.has_psk() || self.is_fallback() {
            return true;
        }

        matches!(
            self.params.handshake.pattern,
            HandshakePattern::NK
                | HandshakePattern::KK
                | HandshakePattern::XK
                | HandshakePattern::IK
                | HandshakePattern::K1K
                | HandshakePattern::I1K
        )
    }

    pub(crate) fn params(&self) -> NoiseParams {
        self.params.clone()
    }
}

impl fmt::Debug for NoiseProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NoiseProtocol").field(&self.name()).finish()
    }
}

impl PartialEq for NoiseProtocol {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for NoiseProtocol {}

impl FromStr for NoiseProtocol {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Role within a single Noise handshake.
///
/// Distinct from the byte-stream side: the client/server roles never change,
/// but the Noise role can flip when the server switches or the client
/// retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends the first Noise message of the current handshake.
    Initiator,
    /// Receives the first Noise message of the current handshake.
    Responder,
}

/// Configuration for one handshake instance.
///
/// Immutable once a handshake begins; a reinitialization installs a fresh
/// one. Key material zeroizes on drop. Does not implement `Clone` to prevent
/// accidental duplication of secrets.
pub struct HandshakeConfig {
    pub(crate) role: Role,
    pub(crate) prologue: Vec<u8>,
    pub(crate) local_static: Option<Zeroizing<Vec<u8>>>,
    pub(crate) remote_static: Option<Vec<u8>>,
    pub(crate) psks: Vec<Zeroizing<Vec<u8>>>,
}

impl HandshakeConfig {
    /// Configuration for the initiator of a handshake.
    pub fn initiator() -> Self {
        Self::new(Role::Initiator)
    }

    /// Configuration for the responder of a handshake.
    pub fn responder() -> Self {
        Self::new(Role::Responder)
    }

    fn new(role: Role) -> Self {
        Self {
            role,
            prologue: Vec::new(),
            local_static: None,
            remote_static: None,
            psks: Vec::new(),
        }
    }

    /// Application prologue bytes, appended after the NoiseSocket-internal
    /// prologue when the handshake state is instantiated.
    pub fn with_prologue(mut self, prologue: &[u8]) -> Self {
        self.prologue = prologue.to_vec();
        self
    }

    /// Local static private key.
    pub fn with_local_static(mut self, key: &[u8]) -> Self {
        self.local_static = Some(Zeroizing::new(key.to_vec()));
        self
    }

    /// Remote static public key.
    pub fn with_remote_static(mut self, key: &[u8]) -> Self {
        self.remote_static = Some(key.to_vec());
        self
    }

    /// Append a pre-shared key. Keys are consumed in the order of the
    /// pattern's `psk0..psk3` modifiers.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` unless the key is exactly 32 bytes.
    pub fn with_psk(mut self, key: &[u8]) -> Result<Self, ProtocolError> {
        if key.len() != 32 {
            return Err(ProtocolError::InvalidArgument);
        }
        self.psks.push(Zeroizing::new(key.to_vec()));
        Ok(self)
    }

    /// Role within the Noise handshake.
    pub fn role(&self) -> Role {
        self.role
    }
}

impl fmt::Debug for HandshakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material is never printed.
        f.debug_struct("HandshakeConfig")
            .field("role", &self.role)
            .field("prologue_len", &self.prologue.len())
            .field("has_local_static", &self.local_static.is_some())
            .field("has_remote_static", &self.remote_static.is_some())
            .field("psks", &self.psks.len())
            .finish()
    }
}

/// A freshly generated DH keypair for a protocol.
///
/// The private half zeroizes on drop.
pub struct StaticKeypair {
    private: Zeroizing<Vec<u8>>,
    public: Vec<u8>,
}

impl StaticKeypair {
    /// Generate a keypair using the protocol's DH function.
    ///
    /// # Errors
    ///
    /// Returns `Crypto` if the collaborator cannot generate a key.
    pub fn generate(protocol: &NoiseProtocol) -> Result<Self, ProtocolError> {
        let keypair = Builder::new(protocol.params())
            .generate_keypair()
            .map_err(|_| ProtocolError::Crypto)?;

        Ok(Self {
            private: Zeroizing::new(keypair.private),
            public: keypair.public,
        })
    }

    /// The private key bytes.
    pub fn private(&self) -> &[u8] {
        &self.private
    }

    /// The public key bytes.
    pub fn public(&self) -> &[u8] {
        &self.public
    }
}
