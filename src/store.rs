use std::{collections::HashMap, sync::Mutex};

use anyhow::{anyhow, Result};
use bytes::Bytes;

/// In-memory chunk storage of a single peer: file name -> chunk index -> bytes.
///
/// Unbounded; nothing is ever evicted while the peer process runs.
pub struct ChunkStore {
    chunks: Mutex<HashMap<String, HashMap<u64, Bytes>>>,
}

impl Default for ChunkStore {
    fn default() -> Self {
        Self {
            chunks: Mutex::new(HashMap::new()),
        }
    }
}

impl ChunkStore {
    pub fn put(&self, file_name: &str, chunk_id: u64, data: Bytes) -> Result<()> {
        self.chunks
            .lock()
            .map_err(|_| anyhow!("failed to acquire lock"))?
            .entry(file_name.to_string())
            .or_insert(HashMap::new())
            .insert(chunk_id, data);

        Ok(())
    }

    pub fn get(&self, file_name: &str, chunk_id: u64) -> Result<Option<Bytes>> {
        let chunk = self.chunks
            .lock()
            .map_err(|_| anyhow!("failed to acquire lock"))?
            .get(file_name)
            .and_then(|chunks| chunks.get(&chunk_id))
            .cloned();

        Ok(chunk)
    }

    /// Number of files and total number of chunks held.
    pub fn summary(&self) -> Result<(usize, usize)> {
        let chunks = self.chunks.lock().map_err(|_| anyhow!("failed to acquire lock"))?;
        let total = chunks.values().map(|c| c.len()).sum();
        Ok((chunks.len(), total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_what_was_put() {
        let store = ChunkStore::default();
        store.put("a.bin", 0, Bytes::from_static(b"zero")).unwrap();
        store.put("a.bin", 1, Bytes::from_static(b"one")).unwrap();

        assert_eq!(store.get("a.bin", 0).unwrap(), Some(Bytes::from_static(b"zero")));
        assert_eq!(store.get("a.bin", 1).unwrap(), Some(Bytes::from_static(b"one")));
        assert_eq!(store.summary().unwrap(), (1, 2));
    }

    #[test]
    fn put_overwrites_existing_chunk() {
        let store = ChunkStore::default();
        store.put("a.bin", 3, Bytes::from_static(b"old")).unwrap();
        store.put("a.bin", 3, Bytes::from_static(b"new")).unwrap();

        assert_eq!(store.get("a.bin", 3).unwrap(), Some(Bytes::from_static(b"new")));
        assert_eq!(store.summary().unwrap(), (1, 1));
    }

    #[test]
    fn missing_file_or_chunk_is_none() {
        let store = ChunkStore::default();
        store.put("a.bin", 0, Bytes::new()).unwrap();

        assert_eq!(store.get("b.bin", 0).unwrap(), None);
        assert_eq!(store.get("a.bin", 1).unwrap(), None);
        assert_eq!(store.get("a.bin", 0).unwrap(), Some(Bytes::new()));
    }
}
