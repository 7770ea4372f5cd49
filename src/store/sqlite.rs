use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{JobFilter, JobStore, VideoRecords};
use crate::error::{PipelineError, Result};
use crate::job::{JobId, JobStatus, NewJob, OptimizationJob, VideoId};
use crate::video::{OptimizationStatus, VideoOptimizationState};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS optimization_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    video_id INTEGER NOT NULL,
    source_location TEXT NOT NULL,
    metadata_json TEXT NOT NULL,
    status TEXT NOT NULL,
    priority INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    failed_at TEXT,
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_jobs_ready
    ON optimization_jobs(status, priority DESC, created_at, id);

CREATE TABLE IF NOT EXISTS video_optimization (
    video_id INTEGER PRIMARY KEY,
    status TEXT NOT NULL,
    remote_handle TEXT,
    state_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_video_remote_pending
    ON video_optimization(status, updated_at);
";

const JOB_COLUMNS: &str =
    "id, video_id, source_location, metadata_json, status, priority, created_at, failed_at, error_message";

/// Job table and video records in a SQLite database.
///
/// Every operation is a single-row statement against the database, so
/// separate invocations (an upload handler enqueueing while a scheduled
/// drain runs) share one consistent table. Job ids come from the database.
pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open the database at `path`, creating it and its schema when missing.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let conn = Connection::open(&path)?;
        let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("Journal mode {}", mode);
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        // Concurrent invocations wait for each other's write lock
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;

        info!("Opened store at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn encode_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn conversion_error(index: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e))
}

fn decode_time(index: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(index, e))
}

fn job_status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "queued",
        JobStatus::Failed => "failed",
    }
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<OptimizationJob> {
    let metadata: String = row.get(3)?;
    let status: String = row.get(4)?;
    let created_at: String = row.get(6)?;
    let failed_at: Option<String> = row.get(7)?;

    let status = match status.as_str() {
        "queued" => JobStatus::Queued,
        "failed" => JobStatus::Failed,
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                4,
                Type::Text,
                format!("unknown job status '{}'", other).into(),
            ));
        }
    };

    Ok(OptimizationJob {
        id: JobId(row.get::<_, i64>(0)? as u64),
        video_id: VideoId(row.get::<_, i64>(1)? as u64),
        source_location: row.get(2)?,
        metadata: serde_json::from_str(&metadata).map_err(|e| conversion_error(3, e))?,
        status,
        priority: row.get(5)?,
        created_at: decode_time(6, &created_at)?,
        failed_at: failed_at.as_deref().map(|t| decode_time(7, t)).transpose()?,
        error_message: row.get(8)?,
    })
}

fn row_to_state(row: &Row<'_>) -> rusqlite::Result<VideoOptimizationState> {
    let state: String = row.get(0)?;
    serde_json::from_str(&state).map_err(|e| conversion_error(0, e))
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn insert(&self, job: NewJob) -> Result<OptimizationJob> {
        let metadata = serde_json::to_string(&job.metadata)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO optimization_jobs (video_id, source_location, metadata_json, status, priority, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job.video_id.0 as i64,
                job.source_location,
                metadata,
                job_status_str(JobStatus::Queued),
                job.priority,
                encode_time(&job.created_at),
            ],
        )?;
        let id = JobId(conn.last_insert_rowid() as u64);
        debug!("Inserted job {} for video {}", id, job.video_id);
        Ok(job.into_job(id))
    }

    async fn get(&self, id: JobId) -> Result<Option<OptimizationJob>> {
        let conn = self.conn.lock().await;
        let job = conn
            .query_row(
                &format!("SELECT {} FROM optimization_jobs WHERE id = ?1", JOB_COLUMNS),
                params![id.0 as i64],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    async fn list_ready(&self, limit: usize) -> Result<Vec<OptimizationJob>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM optimization_jobs WHERE status = ?1
             ORDER BY priority DESC, created_at ASC, id ASC LIMIT ?2",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![job_status_str(JobStatus::Queued), limit as i64], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    async fn list(&self, filter: JobFilter) -> Result<Vec<OptimizationJob>> {
        let conn = self.conn.lock().await;
        let jobs = match filter {
            JobFilter::All => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM optimization_jobs ORDER BY priority DESC, created_at ASC, id ASC",
                    JOB_COLUMNS
                ))?;
                let jobs = stmt.query_map([], row_to_job)?.collect::<rusqlite::Result<Vec<_>>>()?;
                jobs
            }
            JobFilter::Status(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM optimization_jobs WHERE status = ?1
                     ORDER BY priority DESC, created_at ASC, id ASC",
                    JOB_COLUMNS
                ))?;
                let jobs = stmt
                    .query_map(params![job_status_str(status)], row_to_job)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                jobs
            }
        };
        Ok(jobs)
    }

    async fn delete(&self, id: JobId) -> Result<bool> {
        let conn = self.conn.lock().await;
        let removed = conn.execute("DELETE FROM optimization_jobs WHERE id = ?1", params![id.0 as i64])?;
        Ok(removed > 0)
    }

    async fn mark_failed(&self, id: JobId, message: &str, failed_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE optimization_jobs SET status = ?2, error_message = ?3, failed_at = ?4 WHERE id = ?1",
            params![
                id.0 as i64,
                job_status_str(JobStatus::Failed),
                message,
                encode_time(&failed_at),
            ],
        )?;
        if updated == 0 {
            return Err(PipelineError::JobNotFound(id));
        }
        Ok(())
    }

    async fn count(&self, status: JobStatus) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM optimization_jobs WHERE status = ?1",
            params![job_status_str(status)],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[async_trait]
impl VideoRecords for SqliteStore {
    async fn get_state(&self, video_id: VideoId) -> Result<Option<VideoOptimizationState>> {
        let conn = self.conn.lock().await;
        let state = conn
            .query_row(
                "SELECT state_json FROM video_optimization WHERE video_id = ?1",
                params![video_id.0 as i64],
                row_to_state,
            )
            .optional()?;
        Ok(state)
    }

    async fn put_state(&self, state: VideoOptimizationState) -> Result<()> {
        let state_json = serde_json::to_string(&state)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO video_optimization (video_id, status, remote_handle, state_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(video_id) DO UPDATE SET
                status = excluded.status,
                remote_handle = excluded.remote_handle,
                state_json = excluded.state_json,
                updated_at = excluded.updated_at",
            params![
                state.video_id.0 as i64,
                state.status.to_string(),
                state.remote_handle(),
                state_json,
                encode_time(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    async fn count_processing(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM video_optimization WHERE status = ?1",
            params![OptimizationStatus::Processing.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn list_remote_pending(&self, limit: usize) -> Result<Vec<VideoOptimizationState>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT state_json FROM video_optimization
             WHERE status = ?1 AND remote_handle IS NOT NULL AND remote_handle <> ''
             ORDER BY updated_at ASC, video_id ASC LIMIT ?2",
        )?;
        let states = stmt
            .query_map(
                params![OptimizationStatus::Processing.to_string(), limit as i64],
                row_to_state,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::VideoMetadata;
    use crate::video::OptimizationStatus;
    use assert_fs::TempDir;
    use chrono::Duration as ChronoDuration;
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

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("vidpipe.db");

        let store = SqliteStore::open_or_create(&path).unwrap();
        let metadata = VideoMetadata {
            title: Some("Harbor timelapse".to_string()),
            file_size: Some(1024),
            ..Default::default()
        };
        let job = store
            .insert(NewJob::new(VideoId(9), "https://storage.example/raw/9.mp4", metadata, 5))
            .await
            .unwrap();
        store.put_state(VideoOptimizationState::queued(VideoId(9))).await.unwrap();
        drop(store);

        let reopened = SqliteStore::open_or_create(&path).unwrap();
        let loaded = reopened.get(job.id).await.unwrap().unwrap();
        assert_eq!(loaded, job);
        let state = reopened.get_state(VideoId(9)).await.unwrap().unwrap();
        assert_eq!(state.status, OptimizationStatus::Queued);

        // ids keep increasing after a reopen
        let next = reopened
            .insert(NewJob::new(VideoId(10), "https://storage.example/raw/10.mp4", VideoMetadata::default(), 5))
            .await
            .unwrap();
        assert!(next.id > job.id);
    }

    #[tokio::test]
    async fn test_two_handles_share_one_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vidpipe.db");

        // upload handler and scheduled drain open the database independently
        let uploads = SqliteStore::open_or_create(&path).unwrap();
        let drainer = SqliteStore::open_or_create(&path).unwrap();

        let t0 = Utc::now();
        let first = uploads.insert(new_job(1, 5, t0)).await.unwrap();
        let second = drainer.insert(new_job(2, 5, t0 + ChronoDuration::seconds(1))).await.unwrap();
        let third = uploads.insert(new_job(3, 5, t0 + ChronoDuration::seconds(2))).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_ne!(second.id, third.id);

        for store in [&uploads, &drainer] {
            let videos: Vec<_> = store
                .list(JobFilter::All)
                .await
                .unwrap()
                .iter()
                .map(|j| j.video_id.0)
                .collect();
            assert_eq!(videos, vec![1, 2, 3]);
        }

        assert!(drainer.delete(first.id).await.unwrap());
        drainer.mark_failed(third.id, "encoder crashed", Utc::now()).await.unwrap();
        assert!(uploads.get(first.id).await.unwrap().is_none());
        assert_eq!(uploads.count(JobStatus::Failed).await.unwrap(), 1);

        drop((uploads, drainer));
        let reopened = SqliteStore::open_or_create(&path).unwrap();
        assert_eq!(reopened.list(JobFilter::All).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ready_order_and_limit() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open_or_create(dir.path().join("vidpipe.db")).unwrap();
        let t0 = Utc::now();
        store.insert(new_job(1, 5, t0 + ChronoDuration::seconds(2))).await.unwrap();
        store.insert(new_job(2, 8, t0 + ChronoDuration::seconds(3))).await.unwrap();
        store.insert(new_job(3, 5, t0)).await.unwrap();
        let failed = store.insert(new_job(4, 9, t0)).await.unwrap();
        store.mark_failed(failed.id, "bad source", Utc::now()).await.unwrap();

        let order: Vec<_> = store
            .list_ready(10)
            .await
            .unwrap()
            .iter()
            .map(|j| j.video_id.0)
            .collect();
        assert_eq!(order, vec![2, 3, 1]);
        assert_eq!(store.list_ready(2).await.unwrap().len(), 2);

        let failed = store.get(failed.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("bad source"));
        assert!(failed.failed_at.is_some());
        assert!(matches!(
            store.mark_failed(JobId(999), "x", Utc::now()).await,
            Err(PipelineError::JobNotFound(JobId(999)))
        ));
    }

    #[tokio::test]
    async fn test_remote_pending_oldest_delegation_first() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open_or_create(dir.path().join("vidpipe.db")).unwrap();

        store
            .put_state(VideoOptimizationState::delegated(VideoId(7), "h7", None, json!({})))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .put_state(VideoOptimizationState::delegated(VideoId(3), "h3", None, json!({})))
            .await
            .unwrap();
        store.put_state(VideoOptimizationState::processing(VideoId(5))).await.unwrap();

        let pending: Vec<_> = store
            .list_remote_pending(10)
            .await
            .unwrap()
            .iter()
            .map(|s| s.video_id.0)
            .collect();
        assert_eq!(pending, vec![7, 3]);
        assert_eq!(store.count_processing().await.unwrap(), 3);

        store.put_state(VideoOptimizationState::error(VideoId(7), "gone")).await.unwrap();
        let pending = store.list_remote_pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].video_id, VideoId(3));
    }
}
