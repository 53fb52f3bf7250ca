//! Zeroizing message wrapper.
//!
//! Decrypted payloads are short-lived by construction. Callers must opt-in
//! to copying.

use zeroize::Zeroizing;

/// A received payload that zeroizes on drop.
///
/// Does not implement `Clone` to prevent accidental plaintext duplication.
/// Use [`Message::into_vec`] to take ownership explicitly.
#[derive(Debug)]
pub struct Message(Zeroizing<Vec<u8>>);

impl Message {
    pub(crate) fn new(data: Zeroizing<Vec<u8>>) -> Self {
        Self(data)
    }

    /// The payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the message and take the bytes. The caller becomes
    /// responsible for their lifetime.
    pub fn into_vec(mut self) -> Vec<u8> {
        std::mem::take(&mut *self.0)
    }
}

impl AsRef<[u8]> for Message {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
