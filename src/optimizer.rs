//! One optimization attempt for one video.
//!
//! The engine marks the video `Processing`, picks an initial strategy and walks
//! its fallback chain until an adapter succeeds. Adapter failures are logged
//! and absorbed here; only failures to write the video record (or a chain
//! with no working tier) reach the caller.

use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendOutput, BackendSet};
use crate::error::{PipelineError, Result};
use crate::job::{VideoId, VideoMetadata};
use crate::store::VideoRecords;
use crate::strategy::{Capabilities, Strategy, select_strategy};
use crate::video::{OptimizationMethod, VideoOptimizationState};

/// Where a successful attempt left the video
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizeOutcome {
    /// Finished; the video record is `Completed`.
    Completed {
        method: OptimizationMethod,
        output_reference: Option<String>,
    },
    /// Accepted by the remote service; the video stays `Processing` until reconciled.
    Delegated {
        handle: String,
        manifest_url: Option<String>,
    },
}

pub struct Optimizer {
    videos: Arc<dyn VideoRecords>,
    backends: BackendSet,
    capabilities: Capabilities,
}

impl Optimizer {
    pub fn new(videos: Arc<dyn VideoRecords>, backends: BackendSet, capabilities: Capabilities) -> Self {
        Self {
            videos,
            backends,
            capabilities,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Run one full attempt. Safe to call again for the same video; each call
    /// is a new attempt that overwrites the previous result.
    pub async fn process_video(
        &self,
        video_id: VideoId,
        source_location: &str,
        metadata: &VideoMetadata,
    ) -> Result<OptimizeOutcome> {
        match self.attempt(video_id, source_location, metadata).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("Optimization of video {} failed: {}", video_id, e);
                if let Err(write_err) = self
                    .videos
                    .put_state(VideoOptimizationState::error(video_id, e.to_string()))
                    .await
                {
                    warn!("Could not record error state for video {}: {}", video_id, write_err);
                }
                Err(e)
            }
        }
    }

    async fn attempt(
        &self,
        video_id: VideoId,
        source_location: &str,
        metadata: &VideoMetadata,
    ) -> Result<OptimizeOutcome> {
        self.videos.put_state(VideoOptimizationState::processing(video_id)).await?;

        let strategy = select_strategy(&self.capabilities, metadata);
        info!("Optimizing video {} starting with {}", video_id, strategy);

        let (used, output, fallbacks) = self.run_chain(video_id, strategy, source_location, metadata).await?;

        let mut data = output.data;
        if !fallbacks.is_empty() {
            if let Value::Object(map) = &mut data {
                map.insert("fallbacks".to_string(), json!(fallbacks));
            }
        }

        match output.remote_handle {
            Some(handle) => {
                let manifest_url = output.output_reference;
                self.videos
                    .put_state(VideoOptimizationState::delegated(
                        video_id,
                        &handle,
                        manifest_url.as_deref(),
                        data,
                    ))
                    .await?;
                info!("Video {} delegated to remote service as {}", video_id, handle);
                Ok(OptimizeOutcome::Delegated { handle, manifest_url })
            }
            None => {
                self.videos
                    .put_state(VideoOptimizationState::completed(video_id, output.method, data))
                    .await?;
                info!("Video {} completed via {} ({})", video_id, used, output.method);
                Ok(OptimizeOutcome::Completed {
                    method: output.method,
                    output_reference: output.output_reference,
                })
            }
        }
    }

    /// Try each tier of the chain in order; returns the tier that succeeded,
    /// its output and the failures seen before it.
    async fn run_chain(
        &self,
        video_id: VideoId,
        strategy: Strategy,
        source_location: &str,
        metadata: &VideoMetadata,
    ) -> Result<(Strategy, BackendOutput, Vec<String>)> {
        let mut failures = Vec::new();

        for &tier in strategy.fallback_chain() {
            let Some(backend) = self.backends.get(tier) else {
                debug!("No {} backend registered, skipping", tier);
                failures.push(format!("{}: not available", tier));
                continue;
            };

            match backend.run(source_location, metadata).await {
                Ok(output) => return Ok((tier, output, failures)),
                Err(e) => {
                    warn!("{} failed for video {}, falling back: {}", tier, video_id, e);
                    failures.push(format!("{}: {}", tier, e));
                }
            }
        }

        Err(PipelineError::NoBackendSucceeded(failures.join("; ")))
    }
}
