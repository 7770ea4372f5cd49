use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::backend::{BackendSet, LocalEncoderBackend, RemoteServiceBackend};
use crate::config::{Config, QueueConfig};
use crate::error::{PipelineError, Result};
use crate::job::{JobId, JobStatus, NewJob, OptimizationJob, VideoId, VideoMetadata};
use crate::media::FfmpegEncoder;
use crate::optimizer::{OptimizeOutcome, Optimizer};
use crate::poller::{ReconcileReport, RemoteStatusPoller};
use crate::queue::{AdmissionControl, DrainReport, QueueProcessor};
use crate::remote::{HttpRemoteTranscoder, RemoteTranscoder};
use crate::storage::HttpObjectStorage;
use crate::store::{JobFilter, JobStore, SqliteStore, VideoRecords};
use crate::strategy::Capabilities;
use crate::video::VideoOptimizationState;

/// What `enqueue` did with a video
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// Queued for the next drain; capacity was full.
    Deferred { job_id: JobId, priority: i32 },
    /// Processed inline and removed from the queue.
    Processed {
        job_id: JobId,
        priority: i32,
        outcome: OptimizeOutcome,
    },
    /// The video was marked `Error`.
    Errored { job_id: Option<JobId>, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub failed: usize,
    pub processing: usize,
    pub max_concurrent: usize,
}

/// Entry point wiring the job table, video records, optimizer, queue and poller
pub struct Pipeline {
    settings: QueueConfig,
    jobs: Arc<dyn JobStore>,
    videos: Arc<dyn VideoRecords>,
    optimizer: Arc<Optimizer>,
    poller: Arc<RemoteStatusPoller>,
    processor: QueueProcessor,
    admission: AdmissionControl,
}

impl Pipeline {
    pub fn new(
        settings: QueueConfig,
        jobs: Arc<dyn JobStore>,
        videos: Arc<dyn VideoRecords>,
        backends: BackendSet,
        capabilities: Capabilities,
        remote: Option<Arc<dyn RemoteTranscoder>>,
    ) -> Self {
        let optimizer = Arc::new(Optimizer::new(videos.clone(), backends, capabilities));
        let poller = Arc::new(RemoteStatusPoller::new(videos.clone(), remote));
        let processor = QueueProcessor::new(
            jobs.clone(),
            optimizer.clone(),
            poller.clone(),
            settings.reconcile_limit,
        );
        let admission = AdmissionControl::new(settings.max_concurrent);

        Self {
            settings,
            jobs,
            videos,
            optimizer,
            poller,
            processor,
            admission,
        }
    }

    /// Build the pipeline from configuration: SQLite store, HTTP clients, ffmpeg.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::open_or_create(&config.store.path)?);
        info!("Using store at {}", store.path().display());

        let capabilities = Capabilities::detect(config).await;

        let remote: Option<Arc<dyn RemoteTranscoder>> = if config.remote.is_configured() {
            Some(Arc::new(HttpRemoteTranscoder::new(&config.remote)?))
        } else {
            None
        };

        let storage = Arc::new(HttpObjectStorage::new(&config.storage)?);
        let encoder = Arc::new(FfmpegEncoder::new(config.encoder.clone()));
        let mut backends = BackendSet::new().with(Arc::new(LocalEncoderBackend::new(
            storage,
            encoder,
            config.storage.key_prefix.clone(),
        )));
        if let Some(remote) = &remote {
            backends = backends.with(Arc::new(RemoteServiceBackend::new(remote.clone())));
        }

        Ok(Self::new(
            config.queue.clone(),
            store.clone(),
            store,
            backends,
            capabilities,
            remote,
        ))
    }

    pub fn capabilities(&self) -> Capabilities {
        self.optimizer.capabilities()
    }

    /// Queue a freshly uploaded video and, when capacity allows, optimize it
    /// right away. Never fails: problems end up on the video record.
    pub async fn enqueue(&self, video_id: VideoId, source_location: &str, metadata: VideoMetadata) -> EnqueueOutcome {
        match self.try_enqueue(video_id, source_location, metadata).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Enqueue of video {} failed: {}", video_id, e);
                let message = e.to_string();
                if let Err(write_err) = self
                    .videos
                    .put_state(VideoOptimizationState::error(video_id, &message))
                    .await
                {
                    warn!("Could not record error state for video {}: {}", video_id, write_err);
                }
                EnqueueOutcome::Errored {
                    job_id: None,
                    error: message,
                }
            }
        }
    }

    async fn try_enqueue(
        &self,
        video_id: VideoId,
        source_location: &str,
        metadata: VideoMetadata,
    ) -> Result<EnqueueOutcome> {
        self.videos.put_state(VideoOptimizationState::queued(video_id)).await?;

        let job = self
            .jobs
            .insert(NewJob::new(video_id, source_location, metadata, self.settings.base_priority))
            .await?;
        info!(
            "Queued job {} for video {} with priority {}",
            job.id, video_id, job.priority
        );

        if !self.admission.can_admit_more(self.videos.as_ref()).await? {
            info!(
                "{} or more videos processing, deferring job {} to the next drain",
                self.admission.max_concurrent(),
                job.id
            );
            return Ok(EnqueueOutcome::Deferred {
                job_id: job.id,
                priority: job.priority,
            });
        }

        match self
            .optimizer
            .process_video(video_id, &job.source_location, &job.metadata)
            .await
        {
            Ok(outcome) => {
                if let Err(e) = self.jobs.delete(job.id).await {
                    warn!("Job {} processed inline but could not be removed: {}", job.id, e);
                }
                Ok(EnqueueOutcome::Processed {
                    job_id: job.id,
                    priority: job.priority,
                    outcome,
                })
            }
            Err(e) => {
                // The optimizer already recorded the error on the video
                let message = e.to_string();
                if let Err(store_err) = self.jobs.mark_failed(job.id, &message, Utc::now()).await {
                    warn!("Could not mark job {} failed: {}", job.id, store_err);
                }
                Ok(EnqueueOutcome::Errored {
                    job_id: Some(job.id),
                    error: message,
                })
            }
        }
    }

    pub async fn drain(&self, batch_size: usize) -> Result<DrainReport> {
        self.processor.drain(batch_size).await
    }

    /// Drain with the configured batch size.
    pub async fn drain_default(&self) -> Result<DrainReport> {
        self.drain(self.settings.batch_size).await
    }

    pub async fn reconcile(&self, limit: usize) -> Result<ReconcileReport> {
        self.poller.reconcile(limit).await
    }

    /// Re-submit a failed job: its row is replaced by a fresh one.
    ///
    /// The failed row is removed only once the replacement exists, so a
    /// store failure leaves it in place with its error for a later attempt.
    pub async fn requeue(&self, job_id: JobId) -> Result<EnqueueOutcome> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or(PipelineError::JobNotFound(job_id))?;

        if job.status != JobStatus::Failed {
            return Err(PipelineError::InvalidJobState(job_id, job.status, JobStatus::Failed));
        }

        info!(
            "Requeueing failed job {} for video {} (last error: {})",
            job_id,
            job.video_id,
            job.error_message.as_deref().unwrap_or("unknown")
        );
        let outcome = self.enqueue(job.video_id, &job.source_location, job.metadata).await;

        let replaced = match &outcome {
            EnqueueOutcome::Deferred { job_id, .. } | EnqueueOutcome::Processed { job_id, .. } => Some(*job_id),
            EnqueueOutcome::Errored { job_id, .. } => *job_id,
        };
        match replaced {
            Some(new_id) => {
                self.jobs.delete(job_id).await?;
                info!("Failed job {} replaced by job {}", job_id, new_id);
            }
            None => warn!("Job {} could not be requeued and keeps its failed row", job_id),
        }

        Ok(outcome)
    }

    pub async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<OptimizationJob>> {
        self.jobs.list(filter).await
    }

    pub async fn video_state(&self, video_id: VideoId) -> Result<Option<VideoOptimizationState>> {
        self.videos.get_state(video_id).await
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            queued: self.jobs.count(JobStatus::Queued).await?,
            failed: self.jobs.count(JobStatus::Failed).await?,
            processing: self.videos.count_processing().await?,
            max_concurrent: self.admission.max_concurrent(),
        })
    }
}
