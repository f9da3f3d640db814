use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const ALPN: &[u8] = b"p2p-file-transfer";
pub const CHUNK_NOT_FOUND: &str = "Chunk not found";
pub const INVALID_REQUEST: &str = "Invalid request";

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    GetChunk {
        file_name: String,
        chunk_id: u64,
    },
    StoreChunk {
        file_name: String,
        chunk_id: u64,
        chunk: String, // hex
    },
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum Response {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk: Option<String>,
    },
    Error {
        message: String,
    },
}

impl Response {
    pub fn ok() -> Self {
        Self::Ok { chunk: None }
    }

    pub fn chunk(hex: String) -> Self {
        Self::Ok { chunk: Some(hex) }
    }

    pub fn error(message: &str) -> Self {
        Self::Error { message: message.to_string() }
    }
}

/// One frame read off a stream.
#[derive(Debug, PartialEq)]
pub enum Frame {
    Message(Vec<u8>),
    /// Announced length exceeds the limit; the body was not consumed.
    Oversized(usize),
}

/// Reads one `u32` big-endian length-prefixed frame.
///
/// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    if reader.read(&mut prefix[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut prefix[1..]).await?;

    let len = u32::from_be_bytes(prefix) as usize;
    if len > max_frame_size {
        return Ok(Some(Frame::Oversized(len)));
    }

    let mut payload = Vec::new();
    reader.take(len as u64).read_to_end(&mut payload).await?;
    if payload.len() != len {
        return Err(anyhow!("stream ended after {} of {len} frame bytes", payload.len()));
    }

    Ok(Some(Frame::Message(payload)))
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| anyhow!("frame of {} bytes is too large", payload.len()))?;
    writer.write_u32(len).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Client half of one request/response exchange on an open stream.
pub async fn exchange<R, W>(
    recv: &mut R,
    send: &mut W,
    request: &Request,
    max_frame_size: usize,
) -> Result<Response>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_frame(send, &serde_json::to_vec(request)?).await?;

    match read_frame(recv, max_frame_size).await? {
        Some(Frame::Message(payload)) => Ok(serde_json::from_slice(&payload)?),
        Some(Frame::Oversized(len)) => Err(anyhow!("response of {len} bytes exceeds frame limit")),
        None => Err(anyhow!("stream closed before response")),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::duplex;

    use super::*;

    #[test]
    fn requests_use_command_tag() {
        let request: Request = serde_json::from_value(json!({
            "command": "GET_CHUNK",
            "file_name": "a.bin",
            "chunk_id": 4,
        }))
        .unwrap();
        assert_eq!(request, Request::GetChunk { file_name: "a.bin".into(), chunk_id: 4 });

        let request = Request::StoreChunk {
            file_name: "a.bin".into(),
            chunk_id: 0,
            chunk: "deadbeef".into(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"command": "STORE_CHUNK", "file_name": "a.bin", "chunk_id": 0, "chunk": "deadbeef"}),
        );
    }

    #[test]
    fn malformed_requests_fail_to_decode() {
        assert!(serde_json::from_value::<Request>(json!({"command": "DELETE_CHUNK", "file_name": "a"})).is_err());
        assert!(serde_json::from_value::<Request>(json!({"command": "GET_CHUNK", "file_name": "a", "chunk_id": "1"})).is_err());
        assert!(serde_json::from_value::<Request>(json!({"command": "GET_CHUNK", "chunk_id": 1})).is_err());
        assert!(serde_json::from_value::<Request>(json!({"command": "GET_CHUNK", "file_name": "a", "chunk_id": -1})).is_err());
    }

    #[test]
    fn responses_match_wire_shape() {
        assert_eq!(serde_json::to_value(Response::ok()).unwrap(), json!({"status": "OK"}));
        assert_eq!(
            serde_json::to_value(Response::chunk("deadbeef".into())).unwrap(),
            json!({"status": "OK", "chunk": "deadbeef"}),
        );
        assert_eq!(
            serde_json::to_value(Response::error(CHUNK_NOT_FOUND)).unwrap(),
            json!({"status": "ERROR", "message": "Chunk not found"}),
        );

        let decoded: Response = serde_json::from_str(r#"{"status":"OK"}"#).unwrap();
        assert_eq!(decoded, Response::ok());
    }

    #[tokio::test]
    async fn frames_survive_fragmented_delivery() {
        let (mut client, mut server) = duplex(3);

        let writer = tokio::spawn(async move {
            write_frame(&mut client, b"{\"a\":1}").await.unwrap();
            write_frame(&mut client, b"").await.unwrap();
        });

        assert_eq!(read_frame(&mut server, 1024).await.unwrap(), Some(Frame::Message(b"{\"a\":1}".to_vec())));
        assert_eq!(read_frame(&mut server, 1024).await.unwrap(), Some(Frame::Message(vec![])));
        writer.await.unwrap();
        assert_eq!(read_frame(&mut server, 1024).await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_frame_is_reported_without_reading_body() {
        let (mut client, mut server) = duplex(64);
        client.write_u32(1000).await.unwrap();

        assert_eq!(read_frame(&mut server, 999).await.unwrap(), Some(Frame::Oversized(1000)));
    }

    #[tokio::test]
    async fn announced_length_alone_does_not_make_a_frame() {
        let (mut client, mut server) = duplex(64);
        client.write_u32(64 * 1024 * 1024).await.unwrap();
        client.write_all(b"{}").await.unwrap();
        drop(client);

        assert!(read_frame(&mut server, 64 * 1024 * 1024).await.is_err());
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&[0, 0, 0, 10, b'x']).await.unwrap();
        drop(client);

        assert!(read_frame(&mut server, 1024).await.is_err());
    }
}
