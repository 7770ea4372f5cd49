use thiserror::Error;

use crate::job::{JobId, JobStatus};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Remote transcoding error: {0}")]
    Remote(String),

    #[error("Object storage error: {0}")]
    Storage(String),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Timed out after {0}s: {1}")]
    Timeout(u64, String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {0} is {1}, expected {2}")]
    InvalidJobState(JobId, JobStatus, JobStatus),

    #[error("No backend succeeded: {0}")]
    NoBackendSucceeded(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
