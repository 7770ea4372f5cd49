use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

use crate::job::VideoId;

/// Key in `data` holding the remote job handle of a delegated video.
pub const REMOTE_HANDLE_KEY: &str = "remote_handle";
/// Key in `data` holding the playback manifest URL.
pub const MANIFEST_URL_KEY: &str = "manifest_url";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationStatus {
    Queued,
    Processing,
    Completed,
    Error,
}

impl fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// How a completed video ended up being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationMethod {
    #[serde(rename = "remote_service")]
    RemoteService,
    #[serde(rename = "local_encoder")]
    LocalEncoder,
    /// Served as uploaded
    #[serde(rename = "none")]
    Passthrough,
}

impl fmt::Display for OptimizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RemoteService => "remote_service",
            Self::LocalEncoder => "local_encoder",
            Self::Passthrough => "none",
        };
        write!(f, "{}", s)
    }
}

/// Optimization fields of a video record.
///
/// Constructors keep `method` and `completed_at` present exactly when the
/// status is `Completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoOptimizationState {
    pub video_id: VideoId,
    pub status: OptimizationStatus,
    pub method: Option<OptimizationMethod>,
    pub data: Option<Value>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl VideoOptimizationState {
    pub fn queued(video_id: VideoId) -> Self {
        Self::bare(video_id, OptimizationStatus::Queued, None)
    }

    pub fn processing(video_id: VideoId) -> Self {
        Self::bare(video_id, OptimizationStatus::Processing, None)
    }

    /// Still processing, with the remote service doing the work.
    pub fn delegated(video_id: VideoId, handle: &str, manifest_url: Option<&str>, mut data: Value) -> Self {
        if let Value::Object(map) = &mut data {
            map.insert(REMOTE_HANDLE_KEY.to_string(), json!(handle));
            if let Some(url) = manifest_url {
                map.insert(MANIFEST_URL_KEY.to_string(), json!(url));
            }
        } else {
            data = json!({
                REMOTE_HANDLE_KEY: handle,
                MANIFEST_URL_KEY: manifest_url,
                "response": data,
            });
        }
        Self::bare(video_id, OptimizationStatus::Processing, Some(data))
    }

    pub fn completed(video_id: VideoId, method: OptimizationMethod, data: Value) -> Self {
        Self {
            video_id,
            status: OptimizationStatus::Completed,
            method: Some(method),
            data: Some(data),
            completed_at: Some(Utc::now()),
        }
    }

    pub fn error(video_id: VideoId, message: impl Into<String>) -> Self {
        Self::bare(
            video_id,
            OptimizationStatus::Error,
            Some(json!({ "error": message.into() })),
        )
    }

    fn bare(video_id: VideoId, status: OptimizationStatus, data: Option<Value>) -> Self {
        Self {
            video_id,
            status,
            method: None,
            data,
            completed_at: None,
        }
    }

    /// Remote job handle, if this video was delegated and the handle is non-empty.
    pub fn remote_handle(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.get(REMOTE_HANDLE_KEY))
            .and_then(Value::as_str)
            .filter(|h| !h.is_empty())
    }

    pub fn manifest_url(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.get(MANIFEST_URL_KEY))
            .and_then(Value::as_str)
    }

    pub fn is_awaiting_remote(&self) -> bool {
        self.status == OptimizationStatus::Processing && self.remote_handle().is_some()
    }
}
