use async_trait::async_trait;
use reqwest::Client;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::error::{PipelineError, Result};

/// Object storage holding raw uploads and optimized renditions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Fetch `url` into the file `dest`, returning the number of bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64>;

    /// Store `local_path` under `key`, returning its public URL.
    async fn upload(&self, local_path: &Path, key: &str) -> Result<String>;
}

/// Last path segment of a URL without query or fragment, if any.
pub fn file_name_from_url(url: &str) -> Option<&str> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let path = match without_query.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, path)| path).unwrap_or(""),
        None => without_query,
    };
    path.rsplit('/').next().filter(|name| !name.is_empty())
}

/// Object storage reached over plain HTTP GET and PUT
pub struct HttpObjectStorage {
    client: Client,
    base_url: Option<String>,
    public_base_url: Option<String>,
    api_token: Option<String>,
}

impl HttpObjectStorage {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.as_ref().map(|u| u.trim_end_matches('/').to_string()),
            public_base_url: config
                .public_base_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            api_token: config.api_token.clone(),
        })
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        debug!("Downloading {} to {}", url, dest.display());

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::Storage(format!("Download of {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::Storage(format!(
                "Download of {} failed with {}",
                url,
                response.status()
            )));
        }

        let mut file = fs::File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| PipelineError::Storage(format!("Download of {} interrupted: {}", url, e)))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        info!("Downloaded {} bytes from {}", written, url);
        Ok(written)
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<String> {
        let base_url = self
            .base_url
            .as_deref()
            .ok_or_else(|| PipelineError::Config("Object storage base URL is not set".to_string()))?;
        let key = key.trim_start_matches('/');
        let target = format!("{}/{}", base_url, key);

        let body = fs::read(local_path).await?;
        let size = body.len();

        let mut request = self
            .client
            .put(&target)
            .header(reqwest::header::CONTENT_TYPE, "video/mp4")
            .body(body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::Storage(format!("Upload to {} failed: {}", target, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Storage(format!(
                "Upload to {} failed with {}: {}",
                target, status, error_text
            )));
        }

        info!("Uploaded {} bytes to {}", size, target);

        let public_base = self.public_base_url.as_deref().unwrap_or(base_url);
        Ok(format!("{}/{}", public_base, key))
    }
}
