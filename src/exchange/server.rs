use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use log::{debug, info, warn};
use quinn::{Connecting, ConnectionError, Endpoint, ServerConfig};

use crate::{
    exchange::{engine::serve_stream, protocol::ALPN},
    store::ChunkStore,
    util::*,
};

pub fn server_config(certificate: &str, privkey: &str) -> Result<ServerConfig> {
    let certificates = load_certificates(certificate)?;
    let privkey = load_private_key(privkey)?;

    let mut crypto = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certificates, privkey)?;
    crypto.alpn_protocols = vec![ALPN.to_vec()];

    Ok(ServerConfig::with_crypto(Arc::new(crypto)))
}

/// Accepts QUIC connections until the endpoint is closed.
pub async fn start_peer_server(
    listen: SocketAddr,
    config: ServerConfig,
    store: Arc<ChunkStore>,
    max_frame_size: usize,
) -> Result<()> {
    let endpoint = Endpoint::server(config, listen)?;
    info!("Peer listening on {}. ", endpoint.local_addr()?);

    serve_endpoint(endpoint, store, max_frame_size).await
}

pub async fn serve_endpoint(endpoint: Endpoint, store: Arc<ChunkStore>, max_frame_size: usize) -> Result<()> {
    while let Some(connecting) = endpoint.accept().await {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            if let Err(e) = serve_connection(connecting, store, max_frame_size).await {
                warn!("Connection failed: {e}. ");
            }
        });
    }

    Ok(())
}

async fn serve_connection(connecting: Connecting, store: Arc<ChunkStore>, max_frame_size: usize) -> Result<()> {
    let connection = connecting.await?;
    let remote = connection.remote_address();
    debug!("Accepted connection from {remote}. ");

    loop {
        let (send, recv) = match connection.accept_bi().await {
            Ok(stream) => stream,
            Err(ConnectionError::ApplicationClosed(_)) | Err(ConnectionError::LocallyClosed) => {
                debug!("Connection from {remote} closed. ");
                return Ok(());
            },
            Err(e) => return Err(e.into()),
        };

        let store = Arc::clone(&store);
        tokio::spawn(async move {
            if let Err(e) = serve_stream(recv, send, store, max_frame_size).await {
                warn!("Stream from {remote} failed: {e}. ");
            }
        });
    }
}
