use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::{Result, PipelineError};

/// Default ceiling on videos concurrently in `Processing`
pub const MAX_CONCURRENT: usize = 3;

fn default_max_concurrent() -> usize {
    MAX_CONCURRENT
}

fn default_batch_size() -> usize {
    50
}

fn default_reconcile_limit() -> usize {
    50
}

fn default_base_priority() -> i32 {
    5
}

fn default_remote_timeout_secs() -> u64 {
    60
}

fn default_storage_timeout_secs() -> u64 {
    300
}

fn default_encoder_timeout_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Soft ceiling on videos in `Processing` before enqueue stops running inline
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Jobs taken per drain
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Remote-delegated videos checked per reconciliation pass
    #[serde(default = "default_reconcile_limit")]
    pub reconcile_limit: usize,
    /// Priority every job starts from before size and visibility bonuses
    #[serde(default = "default_base_priority")]
    pub base_priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the remote transcoding API (e.g. https://api.example.com/stream)
    pub endpoint: Option<String>,
    /// Bearer token for the remote API
    pub api_token: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base URL uploads are PUT under
    pub base_url: Option<String>,
    /// Public URL prefix of uploaded objects; falls back to `base_url`
    pub public_base_url: Option<String>,
    /// Bearer token for uploads
    pub api_token: Option<String>,
    /// Key prefix for optimized renditions
    pub key_prefix: String,
    /// Request timeout in seconds
    #[serde(default = "default_storage_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    pub video_codec: String,
    /// Constant rate factor (0-51, lower = better quality)
    pub crf: u32,
    /// Encoding speed (ultrafast, fast, medium, slow, veryslow)
    pub preset: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    /// Additional options appended before the output path
    /// Common options: ["-pix_fmt", "yuv420p", "-maxrate", "4M", "-bufsize", "8M"]
    #[serde(default)]
    pub extra_options: Vec<String>,
    /// Wall-clock limit for one encode, in seconds
    #[serde(default = "default_encoder_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database holding the job table and video records
    pub path: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            batch_size: default_batch_size(),
            reconcile_limit: default_reconcile_limit(),
            base_priority: default_base_priority(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_token: None,
            timeout_secs: default_remote_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            public_base_url: None,
            api_token: None,
            key_prefix: "optimized".to_string(),
            timeout_secs: default_storage_timeout_secs(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            video_codec: "libx264".to_string(),
            crf: 23,
            preset: "medium".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "128k".to_string(),
            extra_options: vec![],
            timeout_secs: default_encoder_timeout_secs(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".vidpipe/vidpipe.db"),
        }
    }
}

impl RemoteConfig {
    /// Both endpoint and token are present and non-empty.
    pub fn is_configured(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.endpoint) && present(&self.api_token)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl EncoderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| PipelineError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| PipelineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Let secrets come from the environment instead of the config file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if let Some(endpoint) = lookup("VIDPIPE_REMOTE_ENDPOINT") {
            self.remote.endpoint = Some(endpoint);
        }
        if let Some(token) = lookup("VIDPIPE_REMOTE_TOKEN") {
            self.remote.api_token = Some(token);
        }
        if let Some(token) = lookup("VIDPIPE_STORAGE_TOKEN") {
            self.storage.api_token = Some(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.queue.max_concurrent, 3);
        assert_eq!(config.queue.batch_size, 50);
        assert_eq!(config.queue.base_priority, 5);
        assert!(!config.remote.is_configured());
        assert_eq!(config.encoder.binary_path, "ffmpeg");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[queue]
max_concurrent = 5

[remote]
endpoint = "https://api.example.com/stream"
api_token = "secret"
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.queue.max_concurrent, 5);
        assert_eq!(config.queue.batch_size, 50);
        assert!(config.remote.is_configured());
        assert_eq!(config.remote.timeout_secs, 60);
        assert_eq!(config.storage.key_prefix, "optimized");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.encoder.crf = 28;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.encoder.crf, 28);
    }

    #[test]
    fn test_default_replaces_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[queue\nmax_concurrent = ").unwrap();
        assert!(Config::from_file(&path).is_err());

        Config::default().save_to_file(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.queue.max_concurrent, MAX_CONCURRENT);
        assert_eq!(loaded.store.path, PathBuf::from(".vidpipe/vidpipe.db"));
    }

    #[test]
    fn test_blank_token_is_not_configured() {
        let mut config = Config::default();
        config.remote.endpoint = Some("https://api.example.com/stream".to_string());
        config.remote.api_token = Some("  ".to_string());
        assert!(!config.remote.is_configured());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "VIDPIPE_REMOTE_ENDPOINT" => Some("https://api.example.com/stream".to_string()),
            "VIDPIPE_REMOTE_TOKEN" => Some("token".to_string()),
            _ => None,
        });
        assert!(config.remote.is_configured());
        assert!(config.storage.api_token.is_none());
    }
}
