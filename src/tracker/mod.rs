mod client;
mod launcher;
mod protocol;
mod registry;
mod tracker;

pub use client::TrackerClient;
pub use launcher::Launcher;
pub use tracker::{
    announce_file_handler as tracker_announce_file_handler,
    get_file_handler as tracker_get_file_handler,
    health_handler as tracker_health_handler,
    list_files_handler as tracker_list_files_handler,
    peers_handler as tracker_peers_handler,
    register_handler as tracker_register_handler,
    shutdown_handler as tracker_shutdown_handler,
    update_chunk_handler as tracker_update_chunk_handler,
    Tracker,
};
