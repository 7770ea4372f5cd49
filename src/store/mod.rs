// Job table and video record access
//
// The pipeline only talks to these traits. Two implementations:
// - MemoryStore: process-local tables, used by tests and embedders
// - SqliteStore: single-row statements against a SQLite database shared by
//   every invocation

pub mod memory;
pub mod sqlite;
mod table;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::job::{JobId, JobStatus, NewJob, OptimizationJob, VideoId};
use crate::video::VideoOptimizationState;

/// Which job rows to list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobFilter {
    #[default]
    All,
    Status(JobStatus),
}

impl JobFilter {
    pub fn matches(&self, job: &OptimizationJob) -> bool {
        match self {
            Self::All => true,
            Self::Status(status) => job.status == *status,
        }
    }
}

/// Persisted table of pending and failed optimization jobs
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a job as `Queued`, assigning its id.
    async fn insert(&self, job: NewJob) -> Result<OptimizationJob>;

    async fn get(&self, id: JobId) -> Result<Option<OptimizationJob>>;

    /// Up to `limit` queued jobs, highest priority first, oldest first within a priority.
    async fn list_ready(&self, limit: usize) -> Result<Vec<OptimizationJob>>;

    /// All matching jobs in processing order.
    async fn list(&self, filter: JobFilter) -> Result<Vec<OptimizationJob>>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: JobId) -> Result<bool>;

    async fn mark_failed(&self, id: JobId, message: &str, failed_at: DateTime<Utc>) -> Result<()>;

    async fn count(&self, status: JobStatus) -> Result<usize>;
}

/// Optimization fields of the external video table
#[async_trait]
pub trait VideoRecords: Send + Sync {
    async fn get_state(&self, video_id: VideoId) -> Result<Option<VideoOptimizationState>>;

    /// Replace the optimization fields of a video in a single write.
    async fn put_state(&self, state: VideoOptimizationState) -> Result<()>;

    async fn count_processing(&self) -> Result<usize>;

    /// Up to `limit` videos still processing with a non-empty remote handle,
    /// least recently written first.
    async fn list_remote_pending(&self, limit: usize) -> Result<Vec<VideoOptimizationState>>;
}
