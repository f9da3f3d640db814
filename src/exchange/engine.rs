use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::{
    exchange::protocol::*,
    store::ChunkStore,
    util::*,
};

/// Decodes one request payload and applies it to the store.
///
/// Anything that is not a well formed command yields `Invalid request`; only a
/// broken store lock is reported as an error.
pub fn dispatch(store: &ChunkStore, payload: &[u8]) -> Result<Response> {
    let request: Request = match serde_json::from_slice(payload) {
        Ok(request) => request,
        Err(e) => {
            warn!("Failed to decode request: {e}. ");
            return Ok(Response::error(INVALID_REQUEST));
        },
    };

    match request {
        Request::GetChunk { file_name, chunk_id } => {
            debug!("Serving chunk {chunk_id} of {file_name}. ");
            let response = match store.get(&file_name, chunk_id)? {
                Some(chunk) => Response::chunk(to_hex(&chunk)),
                None => Response::error(CHUNK_NOT_FOUND),
            };
            Ok(response)
        },
        Request::StoreChunk { file_name, chunk_id, chunk } => {
            let chunk = match from_hex(&chunk) {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("Rejecting chunk {chunk_id} of {file_name}: {e}. ");
                    return Ok(Response::error(INVALID_REQUEST));
                },
            };

            let len = chunk.len();
            store.put(&file_name, chunk_id, Bytes::from(chunk))?;
            info!("Stored chunk {chunk_id} of {file_name} ({len} bytes). ");
            Ok(Response::ok())
        },
    }
}

/// Serves request/response exchanges on one stream until it ends.
///
/// A read failure or clean end of stream closes the loop quietly; the stream
/// is only torn down early when a frame is too large to skip.
pub async fn serve_stream<R, W>(
    mut recv: R,
    mut send: W,
    store: Arc<ChunkStore>,
    max_frame_size: usize,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = match read_frame(&mut recv, max_frame_size).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                debug!("Stream read ended: {e}. ");
                break;
            },
        };

        match frame {
            Frame::Message(payload) => {
                let response = dispatch(&store, &payload)?;
                write_frame(&mut send, &serde_json::to_vec(&response)?).await?;
            },
            Frame::Oversized(len) => {
                warn!("Dropping stream after {len} byte frame (limit {max_frame_size}). ");
                let response = Response::error(INVALID_REQUEST);
                write_frame(&mut send, &serde_json::to_vec(&response)?).await?;
                break;
            },
        }
    }

    if let Err(e) = send.shutdown().await {
        debug!("Stream already closed by peer: {e}. ");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        pin::Pin,
        task::{Context, Poll},
    };

    use serde_json::{json, Value};
    use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};

    use super::*;

    const MAX_FRAME: usize = 1024 * 1024;

    struct TestStream {
        recv: ReadHalf<DuplexStream>,
        send: WriteHalf<DuplexStream>,
    }

    impl TestStream {
        async fn send_raw(&mut self, payload: &[u8]) -> Value {
            write_frame(&mut self.send, payload).await.unwrap();
            match read_frame(&mut self.recv, MAX_FRAME).await.unwrap() {
                Some(Frame::Message(payload)) => serde_json::from_slice(&payload).unwrap(),
                other => panic!("unexpected frame {other:?}"),
            }
        }

        async fn send_json(&mut self, request: Value) -> Value {
            self.send_raw(&serde_json::to_vec(&request).unwrap()).await
        }
    }

    fn open_stream(store: Arc<ChunkStore>) -> (TestStream, tokio::task::JoinHandle<Result<()>>) {
        let (client, server) = duplex(4096);
        let (server_recv, server_send) = split(server);
        let handle = tokio::spawn(serve_stream(server_recv, server_send, store, MAX_FRAME));

        let (recv, send) = split(client);
        (TestStream { recv, send }, handle)
    }

    #[test]
    fn dispatch_stores_and_serves() {
        let store = ChunkStore::default();

        let response = dispatch(&store, br#"{"command":"STORE_CHUNK","file_name":"f","chunk_id":2,"chunk":"00ff"}"#).unwrap();
        assert_eq!(response, Response::ok());
        assert_eq!(store.get("f", 2).unwrap(), Some(Bytes::from_static(&[0x00, 0xff])));

        let response = dispatch(&store, br#"{"command":"GET_CHUNK","file_name":"f","chunk_id":2}"#).unwrap();
        assert_eq!(response, Response::chunk("00ff".into()));
    }

    #[test]
    fn dispatch_rejects_bad_hex_without_storing() {
        let store = ChunkStore::default();

        let response = dispatch(&store, br#"{"command":"STORE_CHUNK","file_name":"f","chunk_id":0,"chunk":"xyz"}"#).unwrap();
        assert_eq!(response, Response::error(INVALID_REQUEST));
        assert_eq!(store.get("f", 0).unwrap(), None);
    }

    #[tokio::test]
    async fn store_then_get_round_trip() {
        let (mut stream, _) = open_stream(Arc::new(ChunkStore::default()));

        let stored = stream
            .send_json(json!({"command": "STORE_CHUNK", "file_name": "a.bin", "chunk_id": 0, "chunk": "deadbeef"}))
            .await;
        assert_eq!(stored, json!({"status": "OK"}));

        let fetched = stream
            .send_json(json!({"command": "GET_CHUNK", "file_name": "a.bin", "chunk_id": 0}))
            .await;
        assert_eq!(fetched, json!({"status": "OK", "chunk": "deadbeef"}));
    }

    #[tokio::test]
    async fn unknown_file_is_not_found() {
        let (mut stream, _) = open_stream(Arc::new(ChunkStore::default()));

        let fetched = stream
            .send_json(json!({"command": "GET_CHUNK", "file_name": "never.bin", "chunk_id": 0}))
            .await;
        assert_eq!(fetched, json!({"status": "ERROR", "message": "Chunk not found"}));
    }

    #[tokio::test]
    async fn garbage_keeps_stream_usable() {
        let store = Arc::new(ChunkStore::default());
        store.put("a.bin", 1, Bytes::from_static(&[1, 2])).unwrap();
        let (mut stream, _) = open_stream(store);

        let response = stream.send_raw(b"\x00\x01 definitely not json").await;
        assert_eq!(response, json!({"status": "ERROR", "message": "Invalid request"}));

        let response = stream.send_json(json!({"command": "PING"})).await;
        assert_eq!(response, json!({"status": "ERROR", "message": "Invalid request"}));

        let response = stream
            .send_json(json!({"command": "GET_CHUNK", "file_name": "a.bin", "chunk_id": 1}))
            .await;
        assert_eq!(response, json!({"status": "OK", "chunk": "0102"}));
    }

    #[tokio::test]
    async fn stream_end_closes_loop() {
        let (stream, handle) = open_stream(Arc::new(ChunkStore::default()));
        drop(stream);

        assert!(handle.await.unwrap().is_ok());
    }

    struct ResetWriter;

    impl AsyncWrite for ResetWriter {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()))
        }
    }

    #[tokio::test]
    async fn reset_stream_ends_loop_quietly() {
        let store = Arc::new(ChunkStore::default());

        assert!(serve_stream(&b""[..], ResetWriter, store, MAX_FRAME).await.is_ok());
    }

    #[tokio::test]
    async fn oversized_frame_closes_stream() {
        let store = Arc::new(ChunkStore::default());
        let (client, server) = duplex(4096);
        let (server_recv, server_send) = split(server);
        let handle = tokio::spawn(serve_stream(server_recv, server_send, store, 16));
        let (mut recv, mut send) = split(client);

        write_frame(&mut send, &[b' '; 17]).await.unwrap();

        let response = match read_frame(&mut recv, MAX_FRAME).await.unwrap() {
            Some(Frame::Message(payload)) => serde_json::from_slice::<Response>(&payload).unwrap(),
            other => panic!("unexpected frame {other:?}"),
        };
        assert_eq!(response, Response::error(INVALID_REQUEST));
        assert_eq!(read_frame(&mut recv, MAX_FRAME).await.unwrap(), None);
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn client_exchange_speaks_the_same_framing() {
        let (mut stream, _) = open_stream(Arc::new(ChunkStore::default()));

        let request = Request::StoreChunk { file_name: "x".into(), chunk_id: 9, chunk: "AB".into() };
        let response = exchange(&mut stream.recv, &mut stream.send, &request, MAX_FRAME).await.unwrap();
        assert_eq!(response, Response::ok());

        let request = Request::GetChunk { file_name: "x".into(), chunk_id: 9 };
        let response = exchange(&mut stream.recv, &mut stream.send, &request, MAX_FRAME).await.unwrap();
        assert_eq!(response, Response::chunk("ab".into()));
    }
}
