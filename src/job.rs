use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

const MIB: u64 = 1024 * 1024;

/// Declared sizes below this earn the larger priority bonus.
pub const SMALL_FILE_BYTES: u64 = 100 * MIB;
/// Declared sizes below this (and not below `SMALL_FILE_BYTES`) earn the smaller bonus.
pub const MEDIUM_FILE_BYTES: u64 = 500 * MIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(pub u64);

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Unlisted,
    Private,
}

impl Visibility {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "public" => Some(Self::Public),
            "unlisted" => Some(Self::Unlisted),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

/// Caller-supplied description of the upload, captured once at enqueue time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Declared size of the source in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    /// Arbitrary hints passed through to the backends
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl VideoMetadata {
    pub fn is_public(&self) -> bool {
        self.visibility == Some(Visibility::Public)
    }

    /// Priority for a new job: base, +2 under 100 MiB or +1 under 500 MiB, +1 if public.
    pub fn priority(&self, base: i32) -> i32 {
        let mut priority = base;

        match self.file_size {
            Some(size) if size < SMALL_FILE_BYTES => priority += 2,
            Some(size) if size < MEDIUM_FILE_BYTES => priority += 1,
            _ => {}
        }

        if self.is_public() {
            priority += 1;
        }

        priority
    }
}

/// A unit of pending optimization work. Rows only ever exist as `Queued` or `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationJob {
    pub id: JobId,
    pub video_id: VideoId,
    pub source_location: String,
    pub metadata: VideoMetadata,
    pub status: JobStatus,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Job fields known before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub video_id: VideoId,
    pub source_location: String,
    pub metadata: VideoMetadata,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

impl NewJob {
    pub fn new(
        video_id: VideoId,
        source_location: impl Into<String>,
        metadata: VideoMetadata,
        base_priority: i32,
    ) -> Self {
        let priority = metadata.priority(base_priority);
        Self {
            video_id,
            source_location: source_location.into(),
            metadata,
            priority,
            created_at: Utc::now(),
        }
    }

    pub fn into_job(self, id: JobId) -> OptimizationJob {
        OptimizationJob {
            id,
            video_id: self.video_id,
            source_location: self.source_location,
            metadata: self.metadata,
            status: JobStatus::Queued,
            priority: self.priority,
            created_at: self.created_at,
            failed_at: None,
            error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(size_mb: u64, visibility: Visibility) -> VideoMetadata {
        VideoMetadata {
            file_size: Some(size_mb * MIB),
            visibility: Some(visibility),
            ..Default::default()
        }
    }

    #[test]
    fn test_priority_bonuses() {
        assert_eq!(metadata(50, Visibility::Public).priority(5), 8);
        assert_eq!(metadata(50, Visibility::Private).priority(5), 7);
        assert_eq!(metadata(200, Visibility::Public).priority(5), 7);
        assert_eq!(metadata(200, Visibility::Unlisted).priority(5), 6);
        assert_eq!(metadata(800, Visibility::Private).priority(5), 5);
        assert_eq!(VideoMetadata::default().priority(5), 5);
    }

    #[test]
    fn test_priority_size_boundaries() {
        let exactly_small = VideoMetadata {
            file_size: Some(SMALL_FILE_BYTES),
            ..Default::default()
        };
        assert_eq!(exactly_small.priority(0), 1);

        let exactly_medium = VideoMetadata {
            file_size: Some(MEDIUM_FILE_BYTES),
            ..Default::default()
        };
        assert_eq!(exactly_medium.priority(0), 0);
    }

    #[test]
    fn test_metadata_extra_roundtrips_through_json() {
        let json = r#"{"title":"Town hall","file_size":1024,"visibility":"public","extra":{"channel":"news"}}"#;
        let parsed: VideoMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Town hall"));
        assert!(parsed.is_public());
        assert_eq!(parsed.extra["channel"], "news");
    }
}
