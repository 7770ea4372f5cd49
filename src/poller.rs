use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::remote::{RemoteStatus, RemoteTranscoder};
use crate::store::VideoRecords;
use crate::video::{MANIFEST_URL_KEY, OptimizationMethod, REMOTE_HANDLE_KEY, VideoOptimizationState};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    /// Status checks that could not be made this pass
    pub errors: usize,
}

/// Finalizes videos handed to the remote transcoding service.
///
/// Only reads and writes video records; the job rows of delegated videos are
/// already gone by the time they show up here.
pub struct RemoteStatusPoller {
    videos: Arc<dyn VideoRecords>,
    remote: Option<Arc<dyn RemoteTranscoder>>,
}

impl RemoteStatusPoller {
    pub fn new(videos: Arc<dyn VideoRecords>, remote: Option<Arc<dyn RemoteTranscoder>>) -> Self {
        Self { videos, remote }
    }

    pub async fn reconcile(&self, limit: usize) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let Some(remote) = &self.remote else {
            debug!("No remote transcoding service configured, nothing to reconcile");
            return Ok(report);
        };

        let delegated = self.videos.list_remote_pending(limit).await?;
        if !delegated.is_empty() {
            info!("Reconciling {} remote-delegated videos", delegated.len());
        }

        for video in delegated {
            let Some(handle) = video.remote_handle().map(str::to_string) else {
                continue;
            };
            report.checked += 1;

            let status = match remote.status(&handle).await {
                Ok(status) => status,
                Err(e) => {
                    warn!("Status check for video {} ({}) failed: {}", video.video_id, handle, e);
                    report.errors += 1;
                    continue;
                }
            };

            let finalized = match status {
                RemoteStatus::Pending => {
                    report.pending += 1;
                    continue;
                }
                RemoteStatus::Ready { manifest_url } => {
                    report.completed += 1;
                    info!("Remote job {} for video {} is ready", handle, video.video_id);
                    ready_state(&video, &handle, manifest_url)
                }
                RemoteStatus::Failed { reason } => {
                    report.failed += 1;
                    warn!("Remote job {} for video {} failed: {}", handle, video.video_id, reason);
                    let mut state = VideoOptimizationState::error(video.video_id, reason);
                    if let Some(Value::Object(map)) = &mut state.data {
                        map.insert(REMOTE_HANDLE_KEY.to_string(), json!(handle));
                    }
                    state
                }
            };

            if let Err(e) = self.videos.put_state(finalized).await {
                warn!("Could not finalize video {}: {}", video.video_id, e);
                report.errors += 1;
            }
        }

        Ok(report)
    }
}

fn ready_state(video: &VideoOptimizationState, handle: &str, manifest_url: Option<String>) -> VideoOptimizationState {
    let manifest_url = manifest_url.or_else(|| video.manifest_url().map(str::to_string));
    let mut data = video.data.clone().unwrap_or_else(|| json!({}));
    if let Value::Object(map) = &mut data {
        map.insert(MANIFEST_URL_KEY.to_string(), json!(manifest_url));
        map.insert(REMOTE_HANDLE_KEY.to_string(), json!(handle));
    }
    VideoOptimizationState::completed(video.video_id, OptimizationMethod::RemoteService, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::job::VideoId;
    use crate::remote::MockRemoteTranscoder;
    use crate::store::MemoryStore;
    use crate::video::OptimizationStatus;
    use mockall::predicate::eq;

    async fn delegate(store: &MemoryStore, id: u64, handle: &str) {
        store
            .put_state(VideoOptimizationState::delegated(
                VideoId(id),
                handle,
                Some(format!("https://cdn.example/{}.m3u8", handle).as_str()),
                json!({}),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ready_pending_failed() {
        let store = Arc::new(MemoryStore::new());
        delegate(&store, 1, "ready").await;
        delegate(&store, 2, "busy").await;
        delegate(&store, 3, "broken").await;

        let mut remote = MockRemoteTranscoder::new();
        remote.expect_status().with(eq("ready")).returning(|_| {
            Ok(RemoteStatus::Ready {
                manifest_url: Some("https://cdn.example/final.m3u8".to_string()),
            })
        });
        remote
            .expect_status()
            .with(eq("busy"))
            .returning(|_| Ok(RemoteStatus::Pending));
        remote.expect_status().with(eq("broken")).returning(|_| {
            Ok(RemoteStatus::Failed {
                reason: "unrecognized handle".to_string(),
            })
        });

        let poller = RemoteStatusPoller::new(store.clone(), Some(Arc::new(remote)));
        let report = poller.reconcile(50).await.unwrap();

        assert_eq!(
            report,
            ReconcileReport {
                checked: 3,
                completed: 1,
                failed: 1,
                pending: 1,
                errors: 0,
            }
        );

        let ready = store.get_state(VideoId(1)).await.unwrap().unwrap();
        assert_eq!(ready.status, OptimizationStatus::Completed);
        assert_eq!(ready.method, Some(OptimizationMethod::RemoteService));
        assert_eq!(ready.manifest_url(), Some("https://cdn.example/final.m3u8"));

        let busy = store.get_state(VideoId(2)).await.unwrap().unwrap();
        assert_eq!(busy.status, OptimizationStatus::Processing);

        let broken = store.get_state(VideoId(3)).await.unwrap().unwrap();
        assert_eq!(broken.status, OptimizationStatus::Error);
        assert!(broken.method.is_none());
    }

    #[tokio::test]
    async fn test_transport_error_leaves_video_untouched() {
        let store = Arc::new(MemoryStore::new());
        delegate(&store, 1, "h1").await;

        let mut remote = MockRemoteTranscoder::new();
        remote
            .expect_status()
            .returning(|_| Err(PipelineError::Remote("connection reset".to_string())));

        let report = RemoteStatusPoller::new(store.clone(), Some(Arc::new(remote)))
            .reconcile(50)
            .await
            .unwrap();
        assert_eq!(report.errors, 1);
        assert!(store.get_state(VideoId(1)).await.unwrap().unwrap().is_awaiting_remote());
    }

    #[tokio::test]
    async fn test_limit_caps_checks() {
        let store = Arc::new(MemoryStore::new());
        for id in 1..=4 {
            delegate(&store, id, &format!("h{}", id)).await;
        }

        let mut remote = MockRemoteTranscoder::new();
        remote.expect_status().times(2).returning(|_| Ok(RemoteStatus::Pending));

        let report = RemoteStatusPoller::new(store, Some(Arc::new(remote)))
            .reconcile(2)
            .await
            .unwrap();
        assert_eq!(report.checked, 2);
    }

    #[tokio::test]
    async fn test_without_remote_is_noop() {
        let store = Arc::new(MemoryStore::new());
        delegate(&store, 1, "h1").await;

        let report = RemoteStatusPoller::new(store, None).reconcile(50).await.unwrap();
        assert_eq!(report, ReconcileReport::default());
    }
}
