use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use super::protocol::*;
use super::source::ContainerSource;
use super::types::{ContainerSummary, ContainerWithPipeline, ReplicaSummary, SnapshotHandle};
use crate::container::types::{ContainerId, now_ms};
use crate::pipeline::types::Pipeline;
use crate::store::db::DB_FILE;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(300);

/// `ContainerSource` over the SCM's HTTP read API.
pub struct HttpContainerSource {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpContainerSource {
    pub fn new(scm_address: &str) -> Self {
        let base_url = if scm_address.starts_with("http://") || scm_address.starts_with("https://") {
            scm_address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", scm_address.trim_end_matches('/'))
        };

        Self {
            base_url,
            http_client: reqwest::Client::new(),
        }
    }

    /// One attempt. A failed call is retried by the next reconciliation tick,
    /// never here.
    async fn get(&self, url: &str, timeout: Duration) -> Result<reqwest::Response> {
        self.http_client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.get(&url, REQUEST_TIMEOUT).await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("GET {} returned {}", url, response.status()));
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("decoding response of {}", url))
    }
}

#[async_trait]
impl ContainerSource for HttpContainerSource {
    async fn container_count(&self) -> Result<u64> {
        let resp: ContainerCountResponse = self.get_json(ENDPOINT_CONTAINER_COUNT).await?;
        Ok(resp.count)
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        self.get_json(ENDPOINT_CONTAINERS).await
    }

    async fn container_replicas(&self, id: ContainerId) -> Result<Vec<ReplicaSummary>> {
        self.get_json(&format!("{}/{}/replicas", ENDPOINT_CONTAINER, id.0))
            .await
    }

    async fn container_with_pipeline(&self, id: ContainerId) -> Result<ContainerWithPipeline> {
        self.get_json(&format!("{}/{}/pipeline", ENDPOINT_CONTAINER, id.0))
            .await
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        self.get_json(ENDPOINT_PIPELINES).await
    }

    async fn snapshot(&self, staging_dir: &Path) -> Result<Option<SnapshotHandle>> {
        let url = format!("{}{}", self.base_url, ENDPOINT_SNAPSHOT);
        let mut response = self.get(&url, SNAPSHOT_TIMEOUT).await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("GET {} returned {}", url, response.status()));
        }

        let location = staging_dir.join(format!("incoming-{}", now_ms()));
        tokio::fs::create_dir_all(&location).await?;
        let written = match write_body(&mut response, &location.join(DB_FILE)).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&location).await {
                    tracing::warn!("Could not remove partial snapshot {}: {}", location.display(), cleanup);
                }
                return Err(e);
            }
        };

        tracing::info!(
            "Downloaded snapshot ({} bytes) into {}",
            written,
            location.display()
        );
        Ok(Some(SnapshotHandle { location }))
    }
}

/// Streams the response body into `path` chunk by chunk.
async fn write_body(response: &mut reqwest::Response, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("creating {}", path.display()))?;
    let mut written = 0u64;

    while let Some(chunk) = response.chunk().await.context("reading snapshot body")? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.sync_all().await?;

    Ok(written)
}
