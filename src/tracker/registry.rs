use std::collections::{BTreeMap, BTreeSet, HashMap};

use itertools::Itertools;

use crate::{peer::Peer, tracker::protocol::FileListEntry};

/// Chunk index -> peers advertised to hold that chunk.
pub type FileChunkIndex = BTreeMap<u64, BTreeSet<Peer>>;

/// Peers known to the tracker and where each chunk can be found.
///
/// Chunk entries are created lazily and never pruned: removing a peer from the
/// known set leaves its chunk locations behind.
#[derive(Default)]
pub struct Registry {
    peers: Vec<Peer>,
    files: HashMap<String, FileChunkIndex>,
}

impl Registry {
    pub fn contains_peer(&self, peer: &Peer) -> bool {
        self.peers.contains(peer)
    }

    pub fn add_peer(&mut self, peer: Peer) -> bool {
        if self.contains_peer(&peer) {
            return false;
        }

        self.peers.push(peer);
        true
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn peer_on_port(&self, port: u16) -> Option<&Peer> {
        self.peers.iter().find(|peer| peer.port == port)
    }

    pub fn remove_peers_on_port(&mut self, port: u16) -> usize {
        let before = self.peers.len();
        self.peers.retain(|peer| peer.port != port);
        before - self.peers.len()
    }

    pub fn announce_file(&mut self, file_name: &str, chunk_count: u64, peer: &Peer) {
        let chunks = self.files.entry(file_name.to_string()).or_default();

        for chunk_id in 0..chunk_count {
            chunks.entry(chunk_id).or_default().insert(peer.clone());
        }
    }

    pub fn update_chunk(&mut self, file_name: &str, chunk_id: u64, peer: &Peer) {
        self.files
            .entry(file_name.to_string())
            .or_default()
            .entry(chunk_id)
            .or_default()
            .insert(peer.clone());
    }

    pub fn file(&self, file_name: &str) -> Option<&FileChunkIndex> {
        self.files.get(file_name)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn list_files(&self) -> Vec<FileListEntry> {
        self.files
            .iter()
            .sorted_by(|a, b| a.0.cmp(b.0))
            .map(|(file_name, chunks)| FileListEntry {
                file_name: file_name.clone(),
                chunk_count: chunks.len(),
                peers: chunks.values().flatten().unique().cloned().collect(),
            })
            .collect()
    }
}
