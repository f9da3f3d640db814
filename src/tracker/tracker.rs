use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Result};
use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::{debug, info, warn};
use tokio::{process::Child, time::sleep};

use crate::{
    peer::Peer,
    tracker::{
        launcher::Launcher,
        protocol::*,
        registry::{FileChunkIndex, Registry},
    },
};

#[derive(Debug, PartialEq)]
pub enum Registration {
    Registered,
    AlreadyRegistered,
    /// The port is already served by a process spawned for this peer.
    PortInUse(Peer),
}

pub struct Tracker {
    registry: Mutex<Registry>,
    // held across spawn and kill so registrations and shutdowns never interleave
    processes: tokio::sync::Mutex<HashMap<u16, Child>>,
    launcher: Launcher,
    startup_delay: Duration,
    max_announced_chunks: u64,
}

impl Tracker {
    pub fn new(launcher: Launcher, startup_delay: Duration, max_announced_chunks: u64) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            processes: tokio::sync::Mutex::new(HashMap::new()),
            launcher,
            startup_delay,
            max_announced_chunks,
        }
    }

    /// Spawns the peer's listener and records the peer once it is up.
    ///
    /// Nothing is recorded when the process cannot be started or exits
    /// during the startup delay.
    pub async fn register(&self, peer: Peer) -> Result<Registration> {
        let mut processes = self.processes.lock().await;

        {
            let registry = self.registry.lock().map_err(|_| anyhow!("failed to acquire lock"))?;
            if registry.contains_peer(&peer) {
                return Ok(Registration::AlreadyRegistered);
            }

            if processes.contains_key(&peer.port) {
                let owner = registry.peer_on_port(peer.port).cloned().unwrap_or(Peer::new("unknown", peer.port));
                return Ok(Registration::PortInUse(owner));
            }
        }

        let mut child = self.launcher.spawn(peer.port)?;
        sleep(self.startup_delay).await;

        if let Some(status) = child.try_wait()? {
            return Err(anyhow!("peer process for port {} exited during startup with {status}", peer.port));
        }

        processes.insert(peer.port, child);
        self.registry
            .lock()
            .map_err(|_| anyhow!("failed to acquire lock"))?
            .add_peer(peer);

        Ok(Registration::Registered)
    }

    pub fn peers(&self) -> Result<Vec<Peer>> {
        let registry = self.registry.lock().map_err(|_| anyhow!("failed to acquire lock"))?;
        Ok(registry.peers().to_vec())
    }

    /// Returns `false` when the announced chunk count is above the limit.
    pub fn announce_file(&self, request: &AnnounceFileRequest) -> Result<bool> {
        if request.chunk_count > self.max_announced_chunks {
            return Ok(false);
        }

        self.registry
            .lock()
            .map_err(|_| anyhow!("failed to acquire lock"))?
            .announce_file(&request.file_name, request.chunk_count, &request.peer);

        Ok(true)
    }

    pub fn update_chunk(&self, request: &UpdateChunkRequest) -> Result<()> {
        self.registry
            .lock()
            .map_err(|_| anyhow!("failed to acquire lock"))?
            .update_chunk(&request.file_name, request.chunk_id, &request.peer);

        Ok(())
    }

    pub fn get_file(&self, file_name: &str) -> Result<Option<FileChunkIndex>> {
        let registry = self.registry.lock().map_err(|_| anyhow!("failed to acquire lock"))?;
        Ok(registry.file(file_name).cloned())
    }

    pub fn list_files(&self) -> Result<Vec<FileListEntry>> {
        let registry = self.registry.lock().map_err(|_| anyhow!("failed to acquire lock"))?;
        Ok(registry.list_files())
    }

    pub fn health(&self) -> Result<HealthResponse> {
        let registry = self.registry.lock().map_err(|_| anyhow!("failed to acquire lock"))?;
        Ok(HealthResponse {
            status: String::from("healthy"),
            peers: registry.peers().len(),
            files: registry.file_count(),
        })
    }

    /// Stops the process serving `port` and forgets every peer on that port.
    ///
    /// Returns `false` if no process is tracked for the port. Chunk locations
    /// of the removed peers are kept.
    pub async fn shutdown(&self, port: u16) -> Result<bool> {
        let mut processes = self.processes.lock().await;

        let child = match processes.remove(&port) {
            Some(child) => child,
            None => return Ok(false),
        };

        // a failed terminate still drops the child, which kills it
        let terminated = self.launcher.terminate(child).await;

        let removed = self.registry
            .lock()
            .map_err(|_| anyhow!("failed to acquire lock"))?
            .remove_peers_on_port(port);
        info!("Shut down peer on port {port}, forgot {removed} peer(s). ");

        let status = terminated?;
        debug!("Peer process on port {port} exited with {status}. ");

        Ok(true)
    }

    pub async fn shutdown_all(&self) {
        let ports: Vec<_> = self.processes.lock().await.keys().copied().collect();
        for port in ports {
            if let Err(e) = self.shutdown(port).await {
                warn!("Failed to shut down peer on port {port}: {e}. ");
            }
        }
    }
}

fn message(status: StatusCode, message: String) -> Response {
    (status, Json(MessageResponse { message })).into_response()
}

fn error(status: StatusCode, detail: String) -> Response {
    (status, Json(ErrorResponse { detail })).into_response()
}

pub async fn register_handler(
    Extension(tracker): Extension<Arc<Tracker>>,
    Json(peer): Json<Peer>,
) -> impl IntoResponse {
    match tracker.register(peer.clone()).await {
        Ok(Registration::Registered) => {
            info!("Registered new peer {peer}. ");
            message(StatusCode::OK, format!("Peer {peer} registered"))
        },
        Ok(Registration::AlreadyRegistered) => {
            info!("Peer {peer} already registered. ");
            message(StatusCode::OK, format!("Peer {peer} already registered"))
        },
        Ok(Registration::PortInUse(owner)) => {
            warn!("Refusing to register {peer}: port is served for {owner}. ");
            error(StatusCode::CONFLICT, format!("Port {} is already in use by peer {owner}", peer.port))
        },
        Err(e) => {
            warn!("Failed to start processes for peer {peer}: {e}. ");
            error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to start peer processes: {e}"))
        },
    }
}

pub async fn peers_handler(Extension(tracker): Extension<Arc<Tracker>>) -> impl IntoResponse {
    match tracker.peers() {
        Ok(peers) => (StatusCode::OK, Json(peers)).into_response(),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to process request: {e}")),
    }
}

pub async fn announce_file_handler(
    Extension(tracker): Extension<Arc<Tracker>>,
    Json(request): Json<AnnounceFileRequest>,
) -> impl IntoResponse {
    match tracker.announce_file(&request) {
        Ok(true) => {
            info!(
                "Announced file {} with {} chunks on peer {}. ",
                request.file_name, request.chunk_count, request.peer,
            );
            message(
                StatusCode::OK,
                format!("File {} announced with {} chunks", request.file_name, request.chunk_count),
            )
        },
        Ok(false) => error(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("Invalid file info: chunk_count {} exceeds limit", request.chunk_count),
        ),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to process request: {e}")),
    }
}

pub async fn update_chunk_handler(
    Extension(tracker): Extension<Arc<Tracker>>,
    Json(request): Json<UpdateChunkRequest>,
) -> impl IntoResponse {
    match tracker.update_chunk(&request) {
        Ok(()) => {
            info!("Updated chunk {} of {} on peer {}. ", request.chunk_id, request.file_name, request.peer);
            message(
                StatusCode::OK,
                format!("Chunk {} of {} updated on peer {}", request.chunk_id, request.file_name, request.peer.port),
            )
        },
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to process request: {e}")),
    }
}

pub async fn get_file_handler(
    Extension(tracker): Extension<Arc<Tracker>>,
    Path(file_name): Path<String>,
) -> impl IntoResponse {
    let chunks = match tracker.get_file(&file_name) {
        Ok(chunks) => chunks,
        Err(e) => return error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to process request: {e}")),
    };

    let response = match chunks {
        Some(chunks) => GetFileResponse::Found(HashMap::from([(file_name, chunks)])),
        None => GetFileResponse::NotFound { error: String::from(FILE_NOT_FOUND) },
    };

    (StatusCode::OK, Json(response)).into_response()
}

pub async fn list_files_handler(Extension(tracker): Extension<Arc<Tracker>>) -> impl IntoResponse {
    match tracker.list_files() {
        Ok(files) => (StatusCode::OK, Json(files)).into_response(),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to process request: {e}")),
    }
}

pub async fn health_handler(Extension(tracker): Extension<Arc<Tracker>>) -> impl IntoResponse {
    match tracker.health() {
        Ok(health) => (StatusCode::OK, Json(health)).into_response(),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to process request: {e}")),
    }
}

pub async fn shutdown_handler(
    Extension(tracker): Extension<Arc<Tracker>>,
    Path(port): Path<u16>,
) -> impl IntoResponse {
    match tracker.shutdown(port).await {
        Ok(true) => message(StatusCode::OK, format!("Shutdown peer on port {port} successfully")),
        Ok(false) => error(StatusCode::NOT_FOUND, format!("No peer running on port {port}")),
        Err(e) => {
            warn!("Failed to shut down peer on port {port}: {e}. ");
            error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to shut down peer: {e}"))
        },
    }
}
