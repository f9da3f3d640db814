use std::{
    collections::{BTreeSet, HashMap},
    path::Path,
};

use anyhow::{anyhow, Result};
use bytes::Bytes;
use log::{debug, info, warn};
use rand::{seq::SliceRandom, thread_rng};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
};

use crate::{
    exchange::{PeerClient, PeerConnection},
    peer::Peer,
    tracker::TrackerClient,
};

// room for the JSON envelope around a hex encoded chunk
const FRAME_OVERHEAD: usize = 4096;

/// Splits `path` into chunks, stores them on `peer` and announces the file.
///
/// Returns the number of chunks uploaded.
pub async fn upload(
    tracker: &TrackerClient,
    client: &PeerClient,
    peer: &Peer,
    path: &Path,
    name: &str,
    chunk_size: usize,
    max_frame_size: usize,
) -> Result<u64> {
    if chunk_size == 0 || chunk_size.saturating_mul(2).saturating_add(FRAME_OVERHEAD) > max_frame_size {
        return Err(anyhow!("chunk size {chunk_size} does not fit in a {max_frame_size} byte frame"));
    }

    let mut file = File::open(path).await?;
    let connection = client.connect(peer).await?;

    let mut chunk_id = 0;
    loop {
        let chunk = read_chunk(&mut file, chunk_size).await?;
        if chunk.is_empty() {
            break;
        }

        connection.store_chunk(name, chunk_id, &chunk).await?;
        debug!("Stored chunk {chunk_id} of {name} ({} bytes) on {peer}. ", chunk.len());
        chunk_id += 1;
    }

    connection.close();

    tracker.announce_file(name, chunk_id, peer).await?;
    info!("Uploaded {name} as {chunk_id} chunk(s) to {peer}. ");

    Ok(chunk_id)
}

/// Fetches every chunk of `name` from the peers the tracker lists and writes
/// them to `output` in order.
///
/// With `reseed`, each fetched chunk is also stored on that peer and reported
/// to the tracker. Returns the number of bytes written.
pub async fn download(
    tracker: &TrackerClient,
    client: &PeerClient,
    name: &str,
    output: &Path,
    reseed: Option<&Peer>,
) -> Result<u64> {
    let chunks = tracker
        .get_file(name)
        .await?
        .ok_or(anyhow!("file {name} is not known to the tracker"))?;

    if let Some((last, _)) = chunks.iter().next_back() {
        if last.checked_add(1) != Some(chunks.len() as u64) {
            return Err(anyhow!("file {name} is missing chunks below {last}"));
        }
    }

    let reseed = match reseed {
        Some(peer) => Some((peer, client.connect(peer).await?)),
        None => None,
    };

    let mut connections = HashMap::new();
    let mut file = File::create(output).await?;
    let mut written = 0;

    for (chunk_id, holders) in chunks {
        let chunk = fetch_chunk(client, &mut connections, name, chunk_id, holders).await?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;

        if let Some((peer, connection)) = &reseed {
            connection.store_chunk(name, chunk_id, &chunk).await?;
            tracker.update_chunk(name, chunk_id, peer).await?;
        }
    }

    file.flush().await?;

    for connection in connections.values() {
        connection.close();
    }

    info!("Downloaded {name} ({written} bytes) to {}. ", output.display());

    Ok(written)
}

async fn fetch_chunk(
    client: &PeerClient,
    connections: &mut HashMap<Peer, PeerConnection>,
    name: &str,
    chunk_id: u64,
    holders: BTreeSet<Peer>,
) -> Result<Bytes> {
    let mut holders: Vec<_> = holders.into_iter().collect();
    holders.shuffle(&mut thread_rng());

    for holder in holders {
        if !connections.contains_key(&holder) {
            match client.connect(&holder).await {
                Ok(connection) => {
                    connections.insert(holder.clone(), connection);
                },
                Err(e) => {
                    warn!("Failed to connect to {holder}: {e}. ");
                    continue;
                },
            }
        }

        let connection = match connections.get(&holder) {
            Some(connection) => connection,
            None => continue,
        };

        match connection.get_chunk(name, chunk_id).await {
            Ok(Some(chunk)) => return Ok(chunk),
            Ok(None) => debug!("Peer {holder} does not hold chunk {chunk_id} of {name}. "),
            Err(e) => {
                warn!("Failed to fetch chunk {chunk_id} of {name} from {holder}: {e}. ");
                connections.remove(&holder);
            },
        }
    }

    Err(anyhow!("no peer could serve chunk {chunk_id} of {name}"))
}

/// Reads up to `chunk_size` bytes, short only at end of input.
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, chunk_size: usize) -> Result<Vec<u8>> {
    let mut chunk = Vec::with_capacity(chunk_size);
    reader.take(chunk_size as u64).read_to_end(&mut chunk).await?;
    Ok(chunk)
}
