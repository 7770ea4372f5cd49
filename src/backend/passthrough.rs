use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::{BackendOutput, OptimizationBackend};
use crate::error::Result;
use crate::job::VideoMetadata;
use crate::strategy::Strategy;
use crate::video::OptimizationMethod;

/// Terminal fallback: the source is served as uploaded.
pub struct PassthroughBackend;

#[async_trait]
impl OptimizationBackend for PassthroughBackend {
    fn strategy(&self) -> Strategy {
        Strategy::PassThrough
    }

    async fn run(&self, source_location: &str, _metadata: &VideoMetadata) -> Result<BackendOutput> {
        info!("Serving {} without optimization", source_location);
        Ok(BackendOutput {
            method: OptimizationMethod::Passthrough,
            output_reference: Some(source_location.to_string()),
            remote_handle: None,
            data: json!({
                "method": OptimizationMethod::Passthrough,
                "url": source_location,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_always_succeeds_with_source() {
        let output = PassthroughBackend
            .run("https://storage.example/raw/5.mp4", &VideoMetadata::default())
            .await
            .unwrap();
        assert_eq!(output.method, OptimizationMethod::Passthrough);
        assert_eq!(output.output_reference.as_deref(), Some("https://storage.example/raw/5.mp4"));
        assert!(output.remote_handle.is_none());
    }
}
