use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use super::{BackendOutput, OptimizationBackend};
use crate::error::Result;
use crate::job::VideoMetadata;
use crate::remote::RemoteTranscoder;
use crate::strategy::Strategy;
use crate::video::OptimizationMethod;

/// Delegates the transcode to the remote service. Success means "accepted";
/// the reconciliation pass finalizes the video later.
pub struct RemoteServiceBackend {
    transcoder: Arc<dyn RemoteTranscoder>,
}

impl RemoteServiceBackend {
    pub fn new(transcoder: Arc<dyn RemoteTranscoder>) -> Self {
        Self { transcoder }
    }
}

#[async_trait]
impl OptimizationBackend for RemoteServiceBackend {
    fn strategy(&self) -> Strategy {
        Strategy::RemoteService
    }

    async fn run(&self, source_location: &str, metadata: &VideoMetadata) -> Result<BackendOutput> {
        let submission = self.transcoder.submit(source_location, metadata).await?;

        Ok(BackendOutput {
            method: OptimizationMethod::RemoteService,
            output_reference: submission.manifest_url.clone(),
            remote_handle: Some(submission.handle),
            data: json!({ "submission": submission.response }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::remote::{MockRemoteTranscoder, RemoteSubmission};

    #[tokio::test]
    async fn test_success_carries_handle() {
        let mut transcoder = MockRemoteTranscoder::new();
        transcoder.expect_submit().times(1).returning(|_, _| {
            Ok(RemoteSubmission {
                handle: "h-1".to_string(),
                manifest_url: Some("https://cdn.example/h-1.m3u8".to_string()),
                response: json!({ "success": true }),
            })
        });

        let output = RemoteServiceBackend::new(Arc::new(transcoder))
            .run("https://storage.example/raw/1.mp4", &VideoMetadata::default())
            .await
            .unwrap();
        assert_eq!(output.remote_handle.as_deref(), Some("h-1"));
        assert_eq!(output.output_reference.as_deref(), Some("https://cdn.example/h-1.m3u8"));
    }

    #[tokio::test]
    async fn test_submission_error_propagates() {
        let mut transcoder = MockRemoteTranscoder::new();
        transcoder
            .expect_submit()
            .returning(|_, _| Err(PipelineError::Remote("Submission rejected with 500".to_string())));

        let result = RemoteServiceBackend::new(Arc::new(transcoder))
            .run("https://storage.example/raw/1.mp4", &VideoMetadata::default())
            .await;
        assert!(matches!(result, Err(PipelineError::Remote(_))));
    }
}
