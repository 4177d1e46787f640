//! Frame codec for the inbound wire protocol.
//!
//! Frame format:
//! ```text
//! ┌──────────┬──────────┬────────────────────────┐
//! │ len (4B) │ type(1B) │   JSON payload         │
//! │ u32 BE   │ u8       │                        │
//! └──────────┴──────────┴────────────────────────┘
//! ```
//! Length = sizeof(type byte) + sizeof(payload), NOT including the 4-byte prefix.

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Message type: request from client.
pub const MSG_REQUEST: u8 = 0x01;
/// Message type: response to client.
pub const MSG_RESPONSE: u8 = 0x02;
/// Message type: error response to client.
pub const MSG_ERROR: u8 = 0xFF;

/// Read one frame from the stream.
///
/// Returns `(msg_type, payload_bytes)`, or `None` on clean EOF.
/// `max_frame_bytes` caps the accepted frame length.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    max_frame_bytes: u32,
) -> std::io::Result<Option<(u8, Vec<u8>)>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let frame_len = u32::from_be_bytes(len_buf);
    if frame_len > max_frame_bytes {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes (limit {})", frame_len, max_frame_bytes),
        ));
    }
    if frame_len < 1 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame too short: missing type byte",
        ));
    }

    let mut frame_data = vec![0u8; frame_len as usize];
    reader.read_exact(&mut frame_data).await?;

    let payload = frame_data.split_off(1);
    Ok(Some((frame_data[0], payload)))
}

/// Write one frame to the stream.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg_type: u8,
    payload: &[u8],
) -> std::io::Result<()> {
    let frame_len = u32::try_from(payload.len() + 1).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "payload exceeds u32 frame length")
    })?;
    writer.write_all(&frame_len.to_be_bytes()).await?;
    writer.write_all(&[msg_type]).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Encode a JSON payload. Logs and returns an error on failure.
pub fn encode_json(value: &Value) -> std::io::Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        tracing::error!(error = %e, "JSON encoding failed");
        std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_frame_layout() {
        let mut buf = Vec::new();
        write_frame(&mut buf, MSG_RESPONSE, b"{}").await.unwrap();
        assert_eq!(buf, vec![0, 0, 0, 3, MSG_RESPONSE, b'{', b'}']);

        let mut reader = &buf[..];
        let (msg_type, payload) = read_frame(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(msg_type, MSG_RESPONSE);
        assert_eq!(payload, b"{}");
    }

    #[tokio::test]
    async fn test_clean_eof() {
        let mut reader: &[u8] = &[];
        assert!(read_frame(&mut reader, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let payload = encode_json(&json!({"pad": "x".repeat(64)})).unwrap();
        let mut buf = Vec::new();
        write_frame(&mut buf, MSG_REQUEST, &payload).await.unwrap();

        let mut reader = &buf[..];
        let err = read_frame(&mut reader, 16).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_zero_length_frame_rejected() {
        let mut reader: &[u8] = &[0, 0, 0, 0];
        assert!(read_frame(&mut reader, 1024).await.is_err());
    }
}
