use anyhow::{anyhow, Result};
use log::debug;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::{
    peer::Peer,
    tracker::{protocol::*, registry::FileChunkIndex},
};

/// HTTP client for the tracker API.
#[derive(Clone)]
pub struct TrackerClient {
    client: Client,
    base: Url,
}

impl TrackerClient {
    pub fn new(client: Client, base: Url) -> Self {
        Self { client, base }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    pub async fn register(&self, peer: &Peer) -> Result<String> {
        let response = self.client.post(self.endpoint("register")?).json(peer).send().await?;
        let response: MessageResponse = parse(response).await?;
        Ok(response.message)
    }

    pub async fn peers(&self) -> Result<Vec<Peer>> {
        let response = self.client.get(self.endpoint("peers")?).send().await?;
        parse(response).await
    }

    pub async fn announce_file(&self, file_name: &str, chunk_count: u64, peer: &Peer) -> Result<String> {
        let request = AnnounceFileRequest {
            file_name: file_name.to_string(),
            chunk_count,
            peer: peer.clone(),
        };

        let response = self.client.post(self.endpoint("announce_file")?).json(&request).send().await?;
        let response: MessageResponse = parse(response).await?;
        Ok(response.message)
    }

    pub async fn update_chunk(&self, file_name: &str, chunk_id: u64, peer: &Peer) -> Result<String> {
        let request = UpdateChunkRequest {
            file_name: file_name.to_string(),
            chunk_id,
            peer: peer.clone(),
        };

        let response = self.client.post(self.endpoint("update_chunk")?).json(&request).send().await?;
        let response: MessageResponse = parse(response).await?;
        Ok(response.message)
    }

    pub async fn get_file(&self, file_name: &str) -> Result<Option<FileChunkIndex>> {
        let mut url = self.endpoint("get_file/")?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("tracker url {} cannot be a base", self.base))?
            .pop_if_empty()
            .push(file_name);

        debug!("Looking up {file_name} at {url}. ");

        let response = self.client.get(url).send().await?;
        let response: GetFileResponse = parse(response).await?;
        Ok(response.into_chunks(file_name))
    }

    pub async fn list_files(&self) -> Result<Vec<FileListEntry>> {
        let response = self.client.get(self.endpoint("list_files")?).send().await?;
        parse(response).await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self.client.get(self.endpoint("health")?).send().await?;
        parse(response).await
    }

    /// Returns `false` if the tracker has no process running on `port`.
    pub async fn shutdown(&self, port: u16) -> Result<bool> {
        let response = self.client.post(self.endpoint(&format!("shutdown/{port}"))?).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }

        let _: MessageResponse = parse(response).await?;
        Ok(true)
    }
}

async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status != StatusCode::OK {
        let text = response.text().await?;
        let detail = serde_json::from_str::<ErrorResponse>(&text)
            .map(|e| e.detail)
            .unwrap_or(text);
        return Err(anyhow!("tracker returned {status}: {detail}"));
    }

    Ok(response.json().await?)
}
