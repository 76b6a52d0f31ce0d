//! Length-prefixed frame codec
//!
//! Each frame is a 4-byte little-endian length followed by that many bytes
//! of UTF-8 JSON. Zero-length and oversized frames are protocol violations
//! that abort the connection.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use ft_error::{FanTunerError, Result};

/// Maximum frame size (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Read one frame, enforcing the size bounds before buffering the body.
///
/// Returns `Ok(None)` on clean EOF at a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(header) as usize;
    if len == 0 {
        return Err(FanTunerError::FrameInvalid("zero-length frame".into()));
    }
    if len > MAX_FRAME_SIZE {
        return Err(FanTunerError::FrameInvalid(format!(
            "frame of {} bytes exceeds the {} byte limit",
            len, MAX_FRAME_SIZE
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    String::from_utf8(body)
        .map(Some)
        .map_err(|e| FanTunerError::FrameInvalid(format!("frame is not UTF-8: {}", e)))
}

/// Write one frame.
pub async fn write_frame<W>(writer: &mut W, payload: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = payload.as_bytes();
    if bytes.is_empty() {
        return Err(FanTunerError::FrameInvalid("refusing empty frame".into()));
    }
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(FanTunerError::FrameInvalid(format!(
            "payload of {} bytes exceeds the {} byte limit",
            bytes.len(),
            MAX_FRAME_SIZE
        )));
    }

    writer.write_all(&(bytes.len() as u32).to_le_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_preserves_payload() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        write_frame(&mut client, r#"{"type":"getStatus"}"#)
            .await
            .unwrap();
        let frame = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(frame, r#"{"type":"getStatus"}"#);
    }

    #[tokio::test]
    async fn several_frames_in_sequence() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        for i in 0..3 {
            write_frame(&mut client, &format!("frame-{i}")).await.unwrap();
        }
        for i in 0..3 {
            let frame = read_frame(&mut server).await.unwrap().unwrap();
            assert_eq!(frame, format!("frame-{i}"));
        }
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zero_length_frame_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut client, &0u32.to_le_bytes())
            .await
            .unwrap();
        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, FanTunerError::FrameInvalid(_)));
    }

    #[tokio::test]
    async fn oversized_header_is_rejected_without_buffering() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let huge = (MAX_FRAME_SIZE as u32 + 1).to_le_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut client, &huge)
            .await
            .unwrap();
        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, FanTunerError::FrameInvalid(_)));
    }

    #[tokio::test]
    async fn oversized_payload_refused_on_write() {
        let (mut client, _server) = tokio::io::duplex(64);
        let payload = "x".repeat(MAX_FRAME_SIZE + 1);
        let err = write_frame(&mut client, &payload).await.unwrap_err();
        assert!(matches!(err, FanTunerError::FrameInvalid(_)));
    }

    #[tokio::test]
    async fn non_utf8_body_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let body = [0xFFu8, 0xFE, 0xFD];
        tokio::io::AsyncWriteExt::write_all(&mut client, &(body.len() as u32).to_le_bytes())
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut client, &body)
            .await
            .unwrap();
        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, FanTunerError::FrameInvalid(_)));
    }
}
