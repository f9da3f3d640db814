use std::{net::SocketAddr, sync::Arc};

use anyhow::{anyhow, Result};
use bytes::Bytes;
use log::debug;
use quinn::{ClientConfig, Connection, Endpoint};
use rustls::RootCertStore;

use crate::{
    exchange::protocol::*,
    peer::Peer,
    util::*,
};

/// Opens QUIC connections to peers that present a certificate from the
/// configured trust material.
pub struct PeerClient {
    config: ClientConfig,
    server_name: String,
    max_frame_size: usize,
}

pub struct PeerConnection {
    // keeps the socket alive for as long as the connection is used
    _endpoint: Endpoint,
    connection: Connection,
    max_frame_size: usize,
}

impl PeerClient {
    pub fn new(certificate: &str, server_name: String, max_frame_size: usize) -> Result<Self> {
        let mut roots = RootCertStore::empty();
        for certificate in load_certificates(certificate)? {
            roots.add(&certificate).map_err(|e| anyhow!("invalid certificate in trust store: {e:?}"))?;
        }

        let mut crypto = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();
        crypto.alpn_protocols = vec![ALPN.to_vec()];

        Ok(Self {
            config: ClientConfig::new(Arc::new(crypto)),
            server_name,
            max_frame_size,
        })
    }

    pub async fn connect(&self, peer: &Peer) -> Result<PeerConnection> {
        let addr = peer.socket_addr()?;
        self.connect_addr(addr).await
    }

    pub async fn connect_addr(&self, addr: SocketAddr) -> Result<PeerConnection> {
        let bind = match addr {
            SocketAddr::V4(_) => "0.0.0.0:0",
            SocketAddr::V6(_) => "[::]:0",
        };

        let mut endpoint = Endpoint::client(bind.parse()?)?;
        endpoint.set_default_client_config(self.config.clone());

        let connection = endpoint.connect(addr, &self.server_name)?.await?;
        debug!("Connected to peer at {addr}. ");

        Ok(PeerConnection {
            _endpoint: endpoint,
            connection,
            max_frame_size: self.max_frame_size,
        })
    }
}

impl PeerConnection {
    /// Sends one request on a fresh stream and waits for its response.
    pub async fn request(&self, request: &Request) -> Result<Response> {
        let (mut send, mut recv) = self.connection.open_bi().await?;
        let response = exchange(&mut recv, &mut send, request, self.max_frame_size).await?;
        send.finish().await?;
        Ok(response)
    }

    pub async fn get_chunk(&self, file_name: &str, chunk_id: u64) -> Result<Option<Bytes>> {
        let request = Request::GetChunk {
            file_name: file_name.to_string(),
            chunk_id,
        };

        match self.request(&request).await? {
            Response::Ok { chunk: Some(chunk) } => Ok(Some(Bytes::from(from_hex(&chunk)?))),
            Response::Ok { chunk: None } => Err(anyhow!("peer returned no chunk data")),
            Response::Error { message } if message == CHUNK_NOT_FOUND => Ok(None),
            Response::Error { message } => Err(anyhow!("peer rejected request: {message}")),
        }
    }

    pub async fn store_chunk(&self, file_name: &str, chunk_id: u64, data: &[u8]) -> Result<()> {
        let request = Request::StoreChunk {
            file_name: file_name.to_string(),
            chunk_id,
            chunk: to_hex(data),
        };

        match self.request(&request).await? {
            Response::Ok { .. } => Ok(()),
            Response::Error { message } => Err(anyhow!("peer rejected chunk {chunk_id} of {file_name}: {message}")),
        }
    }

    pub fn close(&self) {
        self.connection.close(0u32.into(), b"done");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use quinn::Endpoint;

    use super::*;
    use crate::{exchange::server::{serve_endpoint, server_config}, store::ChunkStore};

    const CERTIFICATE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/cert.pem");
    const PRIVKEY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/key.pem");
    const MAX_FRAME: usize = 1024 * 1024;

    fn spawn_peer(store: Arc<ChunkStore>) -> SocketAddr {
        let config = server_config(CERTIFICATE, PRIVKEY).unwrap();
        let endpoint = Endpoint::server(config, "127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = endpoint.local_addr().unwrap();
        tokio::spawn(serve_endpoint(endpoint, store, MAX_FRAME));
        addr
    }

    #[tokio::test]
    async fn chunks_travel_over_quic() {
        let store = Arc::new(ChunkStore::default());
        let addr = spawn_peer(Arc::clone(&store));

        let client = PeerClient::new(CERTIFICATE, "localhost".into(), MAX_FRAME).unwrap();
        let connection = client.connect_addr(addr).await.unwrap();

        connection.store_chunk("movie.mp4", 0, &[0xde, 0xad, 0xbe, 0xef]).await.unwrap();
        assert_eq!(store.get("movie.mp4", 0).unwrap(), Some(Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef])));

        let chunk = connection.get_chunk("movie.mp4", 0).await.unwrap();
        assert_eq!(chunk, Some(Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef])));

        assert_eq!(connection.get_chunk("movie.mp4", 1).await.unwrap(), None);
        connection.close();
    }

    #[tokio::test]
    async fn streams_on_one_connection_are_independent() {
        let store = Arc::new(ChunkStore::default());
        let addr = spawn_peer(Arc::clone(&store));

        let client = PeerClient::new(CERTIFICATE, "localhost".into(), MAX_FRAME).unwrap();
        let connection = Arc::new(client.connect_addr(addr).await.unwrap());

        let mut handles = vec![];
        for chunk_id in 0..8u64 {
            let connection = Arc::clone(&connection);
            handles.push(tokio::spawn(async move {
                connection.store_chunk("f", chunk_id, &[chunk_id as u8]).await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for chunk_id in 0..8u64 {
            let chunk = connection.get_chunk("f", chunk_id).await.unwrap();
            assert_eq!(chunk, Some(Bytes::from(vec![chunk_id as u8])));
        }
    }

    #[tokio::test]
    async fn untrusted_server_name_is_refused() {
        let addr = spawn_peer(Arc::new(ChunkStore::default()));

        let client = PeerClient::new(CERTIFICATE, "example.org".into(), MAX_FRAME).unwrap();
        assert!(client.connect_addr(addr).await.is_err());
    }
}
