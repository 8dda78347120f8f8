//! Length-prefixed MessagePack framing over any async byte stream.
//!
//! Grounded in `examples/original_source/src/common/redpepper/common/connection.py`'s
//! `receive_message_direct`/`send_message` (4-byte big-endian length
//! prefix, `"HTTP"`-prefix diagnostic, oversize-frame protocol error) and
//! in the manual `read_message`/`write_message` style revealed by
//! `examples/alfredjeanlab-oddjobs/crates/wire/src/wire_tests.rs`, rather
//! than `tokio_util::codec::Framed` — this keeps the framing function
//! signatures generic over `AsyncRead`/`AsyncWrite` and independent of the
//! TLS stream type used by callers.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, info};

use crate::message::Message;
use gw_common::error::{Error, Result};

const LEN_PREFIX_BYTES: usize = 4;

/// Read one framed message. Returns `Ok(None)` on a clean EOF at a frame
/// boundary (peer closed the stream); any other failure is a
/// `ProtocolError`/`Io` error and the caller must close the connection.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_message_size: u32,
) -> Result<Option<Message>> {
    let mut len_buf = [0u8; LEN_PREFIX_BYTES];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    }

    if &len_buf == b"HTTP" {
        info!(
            "received an HTTP-looking frame prefix; the peer is probably an HTTP server, \
             not a gridwatch endpoint — check the configured host and port"
        );
        return Err(Error::protocol("unexpected HTTP traffic on framed socket"));
    }

    let len = u32::from_be_bytes(len_buf);
    if len > max_message_size {
        error!(len, max_message_size, "oversize frame, closing connection");
        return Err(Error::protocol(format!(
            "message of {len} bytes exceeds max_message_size {max_message_size}"
        )));
    }

    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(Error::Io)?;

    let message: Message = rmp_serde::from_slice(&body)
        .map_err(|e| Error::protocol(format!("failed to decode message body: {e}")))?;
    Ok(Some(message))
}

/// Encode and write one framed message. Callers are expected to serialize
/// writes through a send mutex so two producers cannot interleave frame
/// bodies on the same connection.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<()> {
    let body = rmp_serde::to_vec_named(message)
        .map_err(|e| Error::protocol(format!("failed to encode message: {e}")))?;
    let len = u32::try_from(body.len())
        .map_err(|_| Error::protocol("message body too large to frame"))?;
    writer.write_all(&len.to_be_bytes()).await.map_err(Error::Io)?;
    writer.write_all(&body).await.map_err(Error::Io)?;
    writer.flush().await.map_err(Error::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Bye, Message, Ping};
    use std::io::Cursor;

    #[tokio::test]
    async fn writes_then_reads_back_the_same_message() {
        let mut buf = Vec::new();
        write_message(&mut buf, &Message::Ping(Ping::new(7))).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = read_message(&mut cursor, 1024 * 1024).await.unwrap().unwrap();
        assert_eq!(decoded, Message::Ping(Ping::new(7)));
    }

    #[tokio::test]
    async fn oversize_frame_is_rejected() {
        let mut buf = Vec::new();
        write_message(&mut buf, &Message::Bye(Bye::new("x".repeat(100)))).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let err = read_message(&mut cursor, 8).await.unwrap_err();
        assert!(err.to_string().contains("exceeds max_message_size"));
    }

    #[tokio::test]
    async fn http_prefix_is_reported_as_protocol_error() {
        let mut cursor = Cursor::new(b"HTTP/1.1 200 OK\r\n".to_vec());
        let err = read_message(&mut cursor, 1024).await.unwrap_err();
        assert!(err.to_string().contains("HTTP"));
    }

    #[tokio::test]
    async fn clean_eof_at_frame_boundary_returns_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let result = read_message(&mut cursor, 1024).await.unwrap();
        assert!(result.is_none());
    }
}
