//! Length-delimited MessagePack framing.
//!
//! Every frame is a u32 big-endian length prefix followed by a MessagePack
//! map (named serialization, so tagged enums survive the trip). The prefix
//! bounds the read; oversized frames are rejected before allocation.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame (4 MiB). Large enough for a full
/// snapshot, small enough to reject garbage prefixes from a confused peer.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge(usize),
}

/// Encode a value into a length-prefixed MessagePack frame.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let body = rmp_serde::to_vec_named(value)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(body.len()));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode a frame body (without the length prefix).
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(body)?)
}

/// Write one frame to an async writer.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode(value)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame from an async reader. Returns `Ok(None)` on a clean EOF
/// at a frame boundary.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, CodecError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(CodecError::Io(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(decode(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::TerminalFrame;
    use crate::rpc::{Request, Response};

    #[test]
    fn encode_prefixes_length() {
        let frame = encode(&Request::FetchCapabilities).expect("encode");
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let req = Request::TerminalRead {
            target: "local".into(),
            pane_id: "%3".into(),
            cursor: Some(17),
            lines: 500,
        };
        let frame = encode(&req).expect("encode");
        let back: Request = decode(&frame[4..]).expect("decode");
        assert_eq!(back, req);
    }

    #[tokio::test]
    async fn async_write_then_read() {
        let resp = Response::Frame(TerminalFrame::Delta {
            cursor: 1,
            content: "x".into(),
        });
        let mut buf = Vec::new();
        write_frame(&mut buf, &resp).await.expect("write");

        let mut cursor = std::io::Cursor::new(buf);
        let back: Option<Response> = read_frame(&mut cursor).await.expect("read");
        assert_eq!(back, Some(resp));
    }

    #[tokio::test]
    async fn read_eof_at_boundary_is_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let got: Option<Response> = read_frame(&mut cursor).await.expect("read");
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn read_multiple_frames_in_sequence() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Request::FetchSnapshot).await.expect("write 1");
        write_frame(&mut buf, &Request::AcknowledgeAll).await.expect("write 2");

        let mut cursor = std::io::Cursor::new(buf);
        let first: Option<Request> = read_frame(&mut cursor).await.expect("read 1");
        let second: Option<Request> = read_frame(&mut cursor).await.expect("read 2");
        let third: Option<Request> = read_frame(&mut cursor).await.expect("read 3");
        assert_eq!(first, Some(Request::FetchSnapshot));
        assert_eq!(second, Some(Request::AcknowledgeAll));
        assert!(third.is_none());
    }

    #[tokio::test]
    async fn oversized_prefix_rejected_before_allocation() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(u32::MAX).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame::<_, Response>(&mut cursor).await.expect_err("should reject");
        assert!(matches!(err, CodecError::FrameTooLarge(_)));
    }
}
