use std::{net::SocketAddr, sync::Arc};

use anyhow::{anyhow, Error, Result};
use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
    Server,
};
use axum_server::tls_rustls::RustlsConfig;
use log::{info, warn};
use tokio::task::JoinSet;

use crate::tracker::{
    tracker_announce_file_handler,
    tracker_get_file_handler,
    tracker_health_handler,
    tracker_list_files_handler,
    tracker_peers_handler,
    tracker_register_handler,
    tracker_shutdown_handler,
    tracker_update_chunk_handler,
    Tracker,
};

pub fn tracker_router(tracker: Arc<Tracker>) -> Router {
    Router::new()
        .route("/register", post(tracker_register_handler))
        .route("/peers", get(tracker_peers_handler))
        .route("/announce_file", post(tracker_announce_file_handler))
        .route("/update_chunk", post(tracker_update_chunk_handler))
        .route("/get_file/:file_name", get(tracker_get_file_handler))
        .route("/list_files", get(tracker_list_files_handler))
        .route("/health", get(tracker_health_handler))
        .route("/shutdown/:port", post(tracker_shutdown_handler))
        .layer(Extension(tracker))
}

pub async fn start_server(
    listen: &Vec<SocketAddr>,
    tls: bool,
    certificate: Option<String>,
    privkey: Option<String>,
    tracker: Arc<Tracker>,
) -> Result<()> {
    let app = tracker_router(tracker);

    let mut futures = JoinSet::new();

    for addr in listen {
        let app = app.clone();
        let addr = addr.clone();
        let serve = app.into_make_service_with_connect_info::<SocketAddr>();

        if tls {
            let certificate = certificate.as_ref().ok_or(anyhow!("config.tracker.certificate is not set"))?;
            let privkey = privkey.as_ref().ok_or(anyhow!("config.tracker.privkey is not set"))?;
            let config = RustlsConfig::from_pem_file(certificate, privkey).await?;
            info!("Tracker listening on https://{addr}. ");
            futures.spawn(async move {
                axum_server::bind_rustls(addr, config)
                    .serve(serve)
                    .await?;
                Ok::<(), Error>(())
            });
        } else {
            info!("Tracker listening on http://{addr}. ");
            futures.spawn(async move {
                let server = Server::try_bind(&addr)?;
                server
                    .serve(serve)
                    .await?;
                Ok::<(), Error>(())
            });
        }
    }

    if let Some(result) = futures.join_next().await {
        let result = result?;
        if let Err(e) = result {
            warn!("Server failed: {e}. ");
            return Err(e);
        }
    }

    Ok(())
}
