//! Async packet I/O.
//!
//! The read side consumes exactly one length-prefixed packet per call; the
//! write side emits one logical unit as a single contiguous `write_all`.
//! No buffering, no combining, no splitting.

use std::io;

use noisesocket_core::packet::{read_length, LENGTH_PREFIX_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::SocketError;

/// Read one packet: a 2-byte big-endian length followed by that many bytes.
pub(crate) async fn read_packet<S>(stream: &mut S) -> Result<Vec<u8>, SocketError>
where
    S: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    stream.read_exact(&mut prefix).await.map_err(map_io)?;

    let len = read_length(prefix);
    let mut payload = vec![0u8; len];
    if len > 0 {
        stream.read_exact(&mut payload).await.map_err(map_io)?;
    }
    Ok(payload)
}

/// Write one pre-assembled wire unit contiguously.
pub(crate) async fn write_unit<S>(stream: &mut S, unit: &[u8]) -> Result<(), SocketError>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(unit).await.map_err(map_io)?;
    stream.flush().await.map_err(map_io)
}

fn map_io(e: io::Error) -> SocketError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        SocketError::Truncated
    } else {
        SocketError::Stream(e)
    }
}
