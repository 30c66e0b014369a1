//! Length-prefixed framing over a byte stream
//!
//! Each message is a 4-byte little-endian length followed by that many bytes
//! of MessagePack. The functions are generic over the stream halves so tests
//! can run them against in-memory pipes.

use siphon_rl_core::{Result, SiphonRLError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single message. A raw 1920x1080 BGR frame is about
/// 6 MiB, so this leaves generous headroom without letting a corrupt
/// length prefix allocate the moon.
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

/// Read one length-prefixed message body.
pub async fn read_message<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .await
        .map_err(|e| SiphonRLError::Ipc(format!("read message length: {e}")))?;

    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_MESSAGE_BYTES {
        return Err(SiphonRLError::Protocol(format!(
            "message length {len} exceeds the {MAX_MESSAGE_BYTES} byte cap"
        )));
    }

    let mut data = vec![0u8; len];
    reader
        .read_exact(&mut data)
        .await
        .map_err(|e| SiphonRLError::Ipc(format!("read message body: {e}")))?;
    Ok(data)
}

/// Write one message body with its length prefix.
pub async fn write_message<W>(writer: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if data.len() > MAX_MESSAGE_BYTES {
        return Err(SiphonRLError::Protocol(format!(
            "message length {} exceeds the {MAX_MESSAGE_BYTES} byte cap",
            data.len()
        )));
    }

    writer
        .write_all(&(data.len() as u32).to_le_bytes())
        .await
        .map_err(|e| SiphonRLError::Ipc(format!("write message length: {e}")))?;
    writer
        .write_all(data)
        .await
        .map_err(|e| SiphonRLError::Ipc(format!("write message body: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| SiphonRLError::Ipc(format!("flush message: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn messages_roundtrip_through_a_pipe() {
        let (mut client, mut server) = tokio::io::duplex(256);

        write_message(&mut client, b"hello tap").await.unwrap();
        write_message(&mut client, b"").await.unwrap();

        assert_eq!(read_message(&mut server).await.unwrap(), b"hello tap");
        assert_eq!(read_message(&mut server).await.unwrap(), b"");
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let prefix = ((MAX_MESSAGE_BYTES + 1) as u32).to_le_bytes();
        let mut reader = Builder::new().read(&prefix).build();

        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, SiphonRLError::Protocol(_)));
    }

    #[tokio::test]
    async fn truncated_body_is_an_ipc_error() {
        let (mut client, mut server) = tokio::io::duplex(64);

        // Announce ten bytes but hang up after three.
        client.write_all(&10u32.to_le_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, SiphonRLError::Ipc(_)));
    }

    #[tokio::test]
    async fn oversized_payload_is_never_written() {
        let (mut client, _server) = tokio::io::duplex(64);

        let huge = vec![0u8; MAX_MESSAGE_BYTES + 1];
        let err = write_message(&mut client, &huge).await.unwrap_err();
        assert!(matches!(err, SiphonRLError::Protocol(_)));
    }
}
