mod client;
mod engine;
mod protocol;
mod server;

pub use client::{PeerClient, PeerConnection};
pub use server::{serve_endpoint, server_config, start_peer_server};
