//! Length-prefixed packet encoding.
//!
//! Every octet this library emits belongs to a packet:
//! ```text
//! +----------------+------------------+
//! | LENGTH (2B BE) | BODY (N bytes)   |
//! +----------------+------------------+
//! ```
//! Handshake wire units are two back-to-back packets (negotiation data,
//! then the Noise message); transport wire units are a single packet whose
//! body is the AEAD ciphertext.

use crate::error::ProtocolError;

/// Maximum packet body length. Every length field must fit in a u16.
pub const MAX_PACKET_LENGTH: usize = 65535;

/// Length prefix size.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// AEAD authentication tag size appended to every transport ciphertext.
pub const TAG_SIZE: usize = 16;

/// Append one packet (`be16(len) || data`) to `out`.
///
/// # Errors
///
/// Fails with `TooLarge` if `data` exceeds [`MAX_PACKET_LENGTH`].
pub fn append_packet(out: &mut Vec<u8>, data: &[u8]) -> Result<(), ProtocolError> {
    if data.len() > MAX_PACKET_LENGTH {
        return Err(ProtocolError::TooLarge);
    }

    // Cast is safe: length was just checked against MAX_PACKET_LENGTH.
    #[allow(clippy::cast_possible_truncation)]
    let prefix = (data.len() as u16).to_be_bytes();

    out.reserve(LENGTH_PREFIX_SIZE + data.len());
    out.extend_from_slice(&prefix);
    out.extend_from_slice(data);
    Ok(())
}

/// Decode a length prefix read from the wire.
pub fn read_length(bytes: [u8; LENGTH_PREFIX_SIZE]) -> usize {
    u16::from_be_bytes(bytes) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_packet_layout() {
        let mut out = Vec::new();
        append_packet(&mut out, &[0xAA, 0xBB, 0xCC]).unwrap();
        assert_eq!(out, &[0x00, 0x03, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_append_empty_packet() {
        let mut out = Vec::new();
        append_packet(&mut out, &[]).unwrap();
        assert_eq!(out, &[0x00, 0x00]);
    }

    #[test]
    fn test_append_packet_too_large() {
        let mut out = Vec::new();
        let data = vec![0u8; MAX_PACKET_LENGTH + 1];
        assert_eq!(
            append_packet(&mut out, &data),
            Err(ProtocolError::TooLarge)
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_append_packet_max_length() {
        let mut out = Vec::new();
        let data = vec![0x42u8; MAX_PACKET_LENGTH];
        append_packet(&mut out, &data).unwrap();
        assert_eq!(out.len(), LENGTH_PREFIX_SIZE + MAX_PACKET_LENGTH);
        assert_eq!(&out[..2], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_read_length_big_endian() {
        assert_eq!(read_length([0x00, 0x00]), 0);
        assert_eq!(read_length([0x01, 0x00]), 256);
        assert_eq!(read_length([0xFF, 0xFF]), 65535);
    }

    #[test]
    fn test_roundtrip() {
        let mut out = Vec::new();
        append_packet(&mut out, b"NoiseSocket").unwrap();
        let len = read_length([out[0], out[1]]);
        assert_eq!(len, 11);
        assert_eq!(&out[2..2 + len], b"NoiseSocket");
    }
}
