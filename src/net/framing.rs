//! Length-prefixed framing.
//!
//! Every frame is a 10-byte ASCII header holding the payload length as a
//! left-justified decimal (space padded), followed by exactly that many
//! payload bytes. The header carries no type information; layers above
//! decide what the payload means.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::crypto::codec::Codec;
use crate::error::ChatError;

pub const HEADER_LEN: usize = 10;

/// Largest length expressible in a 10-digit decimal header.
pub const MAX_PAYLOAD_LEN: u64 = 9_999_999_999;

/// Read one complete frame, consuming exactly header + payload.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, ChatError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header)
        .await
        .map_err(ChatError::from_read)?;

    let size: u64 = std::str::from_utf8(&header)
        .ok()
        .map(str::trim)
        .and_then(|s| s.parse().ok())
        .ok_or(ChatError::BadHeader)?;

    let mut payload = vec![0u8; size as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(ChatError::from_read)?;
    Ok(payload)
}

/// Write header + payload as one buffer and flush.
///
/// Writes are not atomic across concurrent writers; callers must hold at
/// most one writer per stream at a time.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), ChatError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() as u64 > MAX_PAYLOAD_LEN {
        return Err(ChatError::EncodeTooLarge(payload.len()));
    }
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(format!("{:<width$}", payload.len(), width = HEADER_LEN).as_bytes());
    buf.extend_from_slice(payload);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and run it through the codec.
pub async fn read_message<R>(reader: &mut R, codec: &Codec) -> Result<Vec<u8>, ChatError>
where
    R: AsyncRead + Unpin,
{
    let wire = read_frame(reader).await?;
    codec.decode(&wire)
}

/// Encode through the codec and write as one frame.
pub async fn write_message<W>(writer: &mut W, data: &[u8], codec: &Codec) -> Result<(), ChatError>
where
    W: AsyncWrite + Unpin,
{
    let wire = codec.encode(data)?;
    write_frame(writer, &wire).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, b"hello").await.unwrap();
        let got = read_frame(&mut b).await.unwrap();
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn empty_frame_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, b"").await.unwrap();
        let got = read_frame(&mut b).await.unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn header_is_left_justified_decimal() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, b"hello").await.unwrap();
        let mut header = [0u8; HEADER_LEN];
        b.read_exact(&mut header).await.unwrap();
        assert_eq!(&header, b"5         ");
    }

    #[tokio::test]
    async fn bad_header_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(b"nonsense!!").await.unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, ChatError::BadHeader));
    }

    #[tokio::test]
    async fn negative_length_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(b"-5        ").await.unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, ChatError::BadHeader));
    }

    #[tokio::test]
    async fn truncated_payload_is_short_read() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(b"100       abc").await.unwrap();
        drop(a);
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, ChatError::ShortRead));
    }

    #[tokio::test]
    async fn truncated_header_is_short_read() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(b"12").await.unwrap();
        drop(a);
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, ChatError::ShortRead));
    }
}
