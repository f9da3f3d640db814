use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{peer::Peer, tracker::registry::FileChunkIndex};

pub const FILE_NOT_FOUND: &str = "File not found";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AnnounceFileRequest {
    pub file_name: String,
    pub chunk_count: u64,
    pub peer: Peer,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UpdateChunkRequest {
    pub file_name: String,
    pub chunk_id: u64,
    pub peer: Peer,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub detail: String,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct FileListEntry {
    pub file_name: String,
    pub chunk_count: usize,
    pub peers: Vec<Peer>,
}

#[derive(Serialize, Deserialize, PartialEq, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub peers: usize,
    pub files: usize,
}

/// Either `{"<file_name>": {"<chunk_id>": [peer, ...]}}` or `{"error": "File not found"}`.
#[derive(Serialize, Deserialize, Debug)]
#[serde(untagged)]
pub enum GetFileResponse {
    NotFound { error: String },
    Found(HashMap<String, FileChunkIndex>),
}

impl GetFileResponse {
    pub fn into_chunks(self, file_name: &str) -> Option<FileChunkIndex> {
        match self {
            Self::NotFound { .. } => None,
            Self::Found(mut files) => files.remove(file_name),
        }
    }
}
