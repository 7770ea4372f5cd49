//! Batch processing of the job table and the advisory admission check.
//!
//! `drain` is meant to be invoked by an external scheduler. Nothing here holds
//! a lock across invocations: an inline `enqueue` racing a `drain` can push
//! the number of `Processing` videos past the ceiling. That soft limit is the
//! intended behavior.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::job::{JobId, OptimizationJob, VideoId};
use crate::optimizer::{OptimizeOutcome, Optimizer};
use crate::poller::{ReconcileReport, RemoteStatusPoller};
use crate::store::{JobStore, VideoRecords};

/// Soft cap on concurrently processing videos
#[derive(Debug, Clone, Copy)]
pub struct AdmissionControl {
    max_concurrent: usize,
}

impl AdmissionControl {
    pub fn new(max_concurrent: usize) -> Self {
        Self { max_concurrent }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Advisory: the answer can be stale by the time the caller acts on it.
    pub async fn can_admit_more(&self, videos: &dyn VideoRecords) -> Result<bool> {
        let processing = videos.count_processing().await?;
        Ok(processing < self.max_concurrent)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum JobResult {
    Completed,
    Delegated,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedJob {
    pub job_id: JobId,
    pub video_id: VideoId,
    pub priority: i32,
    pub result: JobResult,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Jobs in the order they were processed
    pub jobs: Vec<ProcessedJob>,
    pub succeeded: usize,
    pub failed: usize,
    /// Outcomes that could not be written back to the job table
    pub store_errors: usize,
    pub reconcile: Option<ReconcileReport>,
}

pub struct QueueProcessor {
    jobs: Arc<dyn JobStore>,
    optimizer: Arc<Optimizer>,
    poller: Arc<RemoteStatusPoller>,
    reconcile_limit: usize,
}

impl QueueProcessor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        optimizer: Arc<Optimizer>,
        poller: Arc<RemoteStatusPoller>,
        reconcile_limit: usize,
    ) -> Self {
        Self {
            jobs,
            optimizer,
            poller,
            reconcile_limit,
        }
    }

    /// Process up to `batch_size` queued jobs, highest priority and oldest first,
    /// one at a time, then run one reconciliation pass.
    pub async fn drain(&self, batch_size: usize) -> Result<DrainReport> {
        let batch = self.jobs.list_ready(batch_size).await?;
        info!("Draining {} queued jobs (batch size {})", batch.len(), batch_size);

        let mut report = DrainReport::default();
        for job in batch {
            let processed = self.process_job(&job, &mut report).await;
            report.jobs.push(processed);
        }

        match self.poller.reconcile(self.reconcile_limit).await {
            Ok(reconciled) => report.reconcile = Some(reconciled),
            Err(e) => warn!("Reconciliation after drain failed: {}", e),
        }

        info!(
            "Drain finished: {} succeeded, {} failed",
            report.succeeded, report.failed
        );
        Ok(report)
    }

    async fn process_job(&self, job: &OptimizationJob, report: &mut DrainReport) -> ProcessedJob {
        info!(
            "Processing job {} for video {} (priority {})",
            job.id, job.video_id, job.priority
        );

        let result = match self
            .optimizer
            .process_video(job.video_id, &job.source_location, &job.metadata)
            .await
        {
            Ok(outcome) => {
                report.succeeded += 1;
                if let Err(e) = self.jobs.delete(job.id).await {
                    error!("Job {} succeeded but could not be removed: {}", job.id, e);
                    report.store_errors += 1;
                }
                match outcome {
                    OptimizeOutcome::Completed { .. } => JobResult::Completed,
                    OptimizeOutcome::Delegated { .. } => JobResult::Delegated,
                }
            }
            Err(e) => {
                report.failed += 1;
                let message = e.to_string();
                if let Err(store_err) = self.jobs.mark_failed(job.id, &message, Utc::now()).await {
                    error!("Job {} failed and could not be marked: {}", job.id, store_err);
                    report.store_errors += 1;
                }
                JobResult::Failed { error: message }
            }
        };

        ProcessedJob {
            job_id: job.id,
            video_id: job.video_id,
            priority: job.priority,
            result,
        }
    }
}
