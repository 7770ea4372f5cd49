use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::JobFilter;
use crate::error::{PipelineError, Result};
use crate::job::{JobId, JobStatus, NewJob, OptimizationJob, VideoId};
use crate::video::{OptimizationStatus, VideoOptimizationState};

/// In-memory image of both tables
#[derive(Debug, Default, Clone)]
pub(crate) struct Tables {
    next_job_id: u64,
    jobs: BTreeMap<JobId, OptimizationJob>,
    /// Each record with the sequence number of its last write
    videos: BTreeMap<VideoId, (u64, VideoOptimizationState)>,
    video_writes: u64,
}

impl Tables {
    pub(crate) fn insert(&mut self, job: NewJob) -> OptimizationJob {
        self.next_job_id += 1;
        let job = job.into_job(JobId(self.next_job_id));
        self.jobs.insert(job.id, job.clone());
        job
    }

    pub(crate) fn get(&self, id: JobId) -> Option<OptimizationJob> {
        self.jobs.get(&id).cloned()
    }

    pub(crate) fn list(&self, filter: JobFilter, limit: Option<usize>) -> Vec<OptimizationJob> {
        let mut jobs: Vec<_> = self.jobs.values().filter(|j| filter.matches(j)).cloned().collect();
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        if let Some(limit) = limit {
            jobs.truncate(limit);
        }
        jobs
    }

    pub(crate) fn delete(&mut self, id: JobId) -> bool {
        self.jobs.remove(&id).is_some()
    }

    pub(crate) fn mark_failed(&mut self, id: JobId, message: &str, failed_at: DateTime<Utc>) -> Result<()> {
        let job = self.jobs.get_mut(&id).ok_or(PipelineError::JobNotFound(id))?;
        job.status = JobStatus::Failed;
        job.error_message = Some(message.to_string());
        job.failed_at = Some(failed_at);
        Ok(())
    }

    pub(crate) fn count(&self, status: JobStatus) -> usize {
        self.jobs.values().filter(|j| j.status == status).count()
    }

    pub(crate) fn get_state(&self, video_id: VideoId) -> Option<VideoOptimizationState> {
        self.videos.get(&video_id).map(|(_, state)| state.clone())
    }

    pub(crate) fn put_state(&mut self, state: VideoOptimizationState) {
        self.video_writes += 1;
        self.videos.insert(state.video_id, (self.video_writes, state));
    }

    pub(crate) fn count_processing(&self) -> usize {
        self.videos
            .values()
            .filter(|(_, v)| v.status == OptimizationStatus::Processing)
            .count()
    }

    /// Oldest write first.
    pub(crate) fn list_remote_pending(&self, limit: usize) -> Vec<VideoOptimizationState> {
        let mut pending: Vec<_> = self.videos.values().filter(|(_, v)| v.is_awaiting_remote()).collect();
        pending.sort_by_key(|(seq, _)| *seq);
        pending.into_iter().take(limit).map(|(_, v)| v.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::VideoMetadata;
    use chrono::Duration;
    use serde_json::json;

    fn new_job(video: u64, priority: i32, created_at: DateTime<Utc>) -> NewJob {
        NewJob {
            video_id: VideoId(video),
            source_location: format!("https://storage.example/raw/{}.mp4", video),
            metadata: VideoMetadata::default(),
            priority,
            created_at,
        }
    }

    #[test]
    fn test_ready_order_priority_then_age_then_id() {
        let mut tables = Tables::default();
        let t0 = Utc::now();
        tables.insert(new_job(1, 5, t0 + Duration::seconds(2)));
        tables.insert(new_job(2, 8, t0 + Duration::seconds(3)));
        tables.insert(new_job(3, 5, t0));
        tables.insert(new_job(4, 5, t0));

        let order: Vec<_> = tables
            .list(JobFilter::Status(JobStatus::Queued), None)
            .iter()
            .map(|j| j.video_id.0)
            .collect();
        assert_eq!(order, vec![2, 3, 4, 1]);
    }

    #[test]
    fn test_failed_jobs_are_not_ready() {
        let mut tables = Tables::default();
        let job = tables.insert(new_job(1, 5, Utc::now()));
        tables.mark_failed(job.id, "encoder exploded", Utc::now()).unwrap();

        assert!(tables.list(JobFilter::Status(JobStatus::Queued), None).is_empty());
        let failed = tables.get(job.id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("encoder exploded"));
        assert_eq!(failed.priority, 5);
    }

    #[test]
    fn test_mark_failed_unknown_job() {
        let mut tables = Tables::default();
        assert!(matches!(
            tables.mark_failed(JobId(42), "x", Utc::now()),
            Err(PipelineError::JobNotFound(JobId(42)))
        ));
    }

    #[test]
    fn test_remote_pending_requires_processing_and_handle() {
        let mut tables = Tables::default();
        tables.put_state(VideoOptimizationState::processing(VideoId(1)));
        tables.put_state(VideoOptimizationState::delegated(VideoId(2), "h2", None, json!({})));
        tables.put_state(VideoOptimizationState::error(VideoId(3), "nope"));

        let pending = tables.list_remote_pending(10);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].video_id, VideoId(2));
        assert_eq!(tables.count_processing(), 2);
    }

    #[test]
    fn test_remote_pending_oldest_delegation_first() {
        let mut tables = Tables::default();
        for id in [9, 4, 6] {
            tables.put_state(VideoOptimizationState::delegated(VideoId(id), &format!("h{}", id), None, json!({})));
        }

        let order: Vec<_> = tables.list_remote_pending(2).iter().map(|v| v.video_id.0).collect();
        assert_eq!(order, vec![9, 4]);

        // rewriting a record moves it to the back
        tables.put_state(VideoOptimizationState::delegated(VideoId(9), "h9", None, json!({})));
        let order: Vec<_> = tables.list_remote_pending(3).iter().map(|v| v.video_id.0).collect();
        assert_eq!(order, vec![4, 6, 9]);
    }
}
