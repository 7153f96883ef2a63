//! Wire codec — length-prefixed JSON frames over an async byte stream.
//!
//! Ported from nanoclaw's `bus/network.py` `_send_msg`/`_recv_msg` helpers: a
//! 4-byte big-endian length header followed by that many bytes of UTF-8 JSON.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::CoreError;

/// Frames larger than this are rejected without being read into memory.
pub const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Write one length-prefixed JSON frame. Callers on a shared stream must
/// serialize their own writes — this function does not lock.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &serde_json::Value,
) -> Result<(), CoreError> {
    let data = serde_json::to_vec(payload)?;
    let len = u32::try_from(data.len())
        .map_err(|_| CoreError::Protocol("frame too large to encode".into()))?;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| CoreError::Transport(e.to_string()))?;
    writer
        .write_all(&data)
        .await
        .map_err(|e| CoreError::Transport(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| CoreError::Transport(e.to_string()))?;
    Ok(())
}

/// Read one length-prefixed JSON frame. Returns `Ok(None)` on a clean EOF
/// before any header bytes arrive (the normal "peer hung up" case).
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<serde_json::Value>, CoreError> {
    let mut header = [0u8; 4];
    if let Err(e) = reader.read_exact(&mut header).await {
        return match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Ok(None),
            _ => Err(CoreError::Transport(e.to_string())),
        };
    }

    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME_BYTES {
        return Err(CoreError::Protocol(format!(
            "frame length {len} exceeds ceiling of {MAX_FRAME_BYTES} bytes"
        )));
    }

    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| CoreError::Protocol(format!("short read on frame body: {e}")))?;

    let value = serde_json::from_slice(&body)
        .map_err(|e| CoreError::Protocol(format!("invalid frame JSON: {e}")))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_frame() {
        let mut buf = Vec::new();
        let payload = serde_json::json!({"type": "inbound", "data": {"a": 1}});
        write_frame(&mut buf, &payload).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn eof_before_header_is_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let decoded = read_frame(&mut cursor).await.unwrap();
        assert!(decoded.is_none());
    }

    #[tokio::test]
    async fn short_body_is_protocol_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&100u32.to_be_bytes());
        buf.extend_from_slice(b"short");
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, CoreError::Protocol(_)));
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_BYTES + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, CoreError::Protocol(_)));
    }

    #[tokio::test]
    async fn bad_json_is_protocol_error() {
        let mut buf = Vec::new();
        let body = b"not json";
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(body);
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, CoreError::Protocol(_)));
    }
}
