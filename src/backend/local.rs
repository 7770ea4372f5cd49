use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{BackendOutput, OptimizationBackend};
use crate::error::{PipelineError, Result};
use crate::job::VideoMetadata;
use crate::media::Encoder;
use crate::storage::{ObjectStorage, file_name_from_url};
use crate::strategy::Strategy;
use crate::video::OptimizationMethod;

const OUTPUT_FILE_NAME: &str = "output.mp4";

/// Local name of the downloaded source: `source` plus the URL's extension when
/// it is a plain short extension. Never equal to `OUTPUT_FILE_NAME`.
fn source_file_name(source_location: &str) -> String {
    let extension = file_name_from_url(source_location)
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()));
    match extension {
        Some(ext) => format!("source.{}", ext.to_ascii_lowercase()),
        None => "source.bin".to_string(),
    }
}

/// Download, transcode locally, upload the rendition.
///
/// All transient files live in a per-call temporary directory that is removed
/// when the call returns, on success and failure alike.
pub struct LocalEncoderBackend {
    storage: Arc<dyn ObjectStorage>,
    encoder: Arc<dyn Encoder>,
    key_prefix: String,
}

impl LocalEncoderBackend {
    pub fn new(storage: Arc<dyn ObjectStorage>, encoder: Arc<dyn Encoder>, key_prefix: impl Into<String>) -> Self {
        Self {
            storage,
            encoder,
            key_prefix: key_prefix.into(),
        }
    }

    /// Storage key of the optimized rendition of `source_location`.
    pub fn derive_key(&self, source_location: &str) -> String {
        let stem = file_name_from_url(source_location)
            .and_then(|name| Path::new(name).file_stem())
            .map(|s| s.to_string_lossy().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "video".to_string());

        let prefix = self.key_prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("{}-{}.mp4", stem, Uuid::new_v4())
        } else {
            format!("{}/{}-{}.mp4", prefix, stem, Uuid::new_v4())
        }
    }

    async fn encode_in(&self, work_dir: &Path, source_location: &str) -> Result<(String, String)> {
        let input_path = work_dir.join(source_file_name(source_location));
        let output_path = work_dir.join(OUTPUT_FILE_NAME);

        self.storage.download(source_location, &input_path).await?;

        self.encoder.transcode(&input_path, &output_path).await?;

        let key = self.derive_key(source_location);
        let url = self.storage.upload(&output_path, &key).await?;
        Ok((key, url))
    }
}

#[async_trait]
impl OptimizationBackend for LocalEncoderBackend {
    fn strategy(&self) -> Strategy {
        Strategy::LocalEncoder
    }

    async fn run(&self, source_location: &str, _metadata: &VideoMetadata) -> Result<BackendOutput> {
        let work_dir = tempfile::Builder::new()
            .prefix("vidpipe-")
            .tempdir()
            .map_err(|e| PipelineError::Encoder(format!("Failed to create temp directory: {}", e)))?;
        debug!("Working directory {}", work_dir.path().display());

        let result = self.encode_in(work_dir.path(), source_location).await;

        // Removed before the result is inspected so both paths clean up
        if let Err(e) = work_dir.close() {
            debug!("Failed to remove working directory: {}", e);
        }

        let (key, url) = result?;
        info!("Optimized rendition of {} stored at {}", source_location, url);

        Ok(BackendOutput {
            method: OptimizationMethod::LocalEncoder,
            output_reference: Some(url.clone()),
            remote_handle: None,
            data: json!({
                "method": OptimizationMethod::LocalEncoder,
                "key": key,
                "url": url,
            }),
        })
    }
}
