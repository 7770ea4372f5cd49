use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::table::Tables;
use super::{JobFilter, JobStore, VideoRecords};
use crate::error::Result;
use crate::job::{JobId, JobStatus, NewJob, OptimizationJob, VideoId};
use crate::video::VideoOptimizationState;

/// Process-local job table and video records
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert(&self, job: NewJob) -> Result<OptimizationJob> {
        Ok(self.tables.lock().await.insert(job))
    }

    async fn get(&self, id: JobId) -> Result<Option<OptimizationJob>> {
        Ok(self.tables.lock().await.get(id))
    }

    async fn list_ready(&self, limit: usize) -> Result<Vec<OptimizationJob>> {
        Ok(self
            .tables
            .lock()
            .await
            .list(JobFilter::Status(JobStatus::Queued), Some(limit)))
    }

    async fn list(&self, filter: JobFilter) -> Result<Vec<OptimizationJob>> {
        Ok(self.tables.lock().await.list(filter, None))
    }

    async fn delete(&self, id: JobId) -> Result<bool> {
        Ok(self.tables.lock().await.delete(id))
    }

    async fn mark_failed(&self, id: JobId, message: &str, failed_at: DateTime<Utc>) -> Result<()> {
        self.tables.lock().await.mark_failed(id, message, failed_at)
    }

    async fn count(&self, status: JobStatus) -> Result<usize> {
        Ok(self.tables.lock().await.count(status))
    }
}

#[async_trait]
impl VideoRecords for MemoryStore {
    async fn get_state(&self, video_id: VideoId) -> Result<Option<VideoOptimizationState>> {
        Ok(self.tables.lock().await.get_state(video_id))
    }

    async fn put_state(&self, state: VideoOptimizationState) -> Result<()> {
        self.tables.lock().await.put_state(state);
        Ok(())
    }

    async fn count_processing(&self) -> Result<usize> {
        Ok(self.tables.lock().await.count_processing())
    }

    async fn list_remote_pending(&self, limit: usize) -> Result<Vec<VideoOptimizationState>> {
        Ok(self.tables.lock().await.list_remote_pending(limit))
    }
}
