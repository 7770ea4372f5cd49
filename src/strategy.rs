use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::config::Config;
use crate::job::VideoMetadata;
use crate::media::{Encoder, FfmpegEncoder};

/// Backend family used to process a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    RemoteService,
    LocalEncoder,
    PassThrough,
}

impl Strategy {
    /// Tiers to try, in order, starting from this one and ending at `PassThrough`.
    pub fn fallback_chain(self) -> &'static [Strategy] {
        match self {
            Self::RemoteService => &[Self::RemoteService, Self::LocalEncoder, Self::PassThrough],
            Self::LocalEncoder => &[Self::LocalEncoder, Self::PassThrough],
            Self::PassThrough => &[Self::PassThrough],
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RemoteService => "remote service",
            Self::LocalEncoder => "local encoder",
            Self::PassThrough => "pass-through",
        };
        write!(f, "{}", s)
    }
}

/// What the environment can do, probed once when the pipeline is built
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub remote_configured: bool,
    pub local_encoder_available: bool,
}

impl Capabilities {
    pub async fn detect(config: &Config) -> Self {
        let remote_configured = config.remote.is_configured();
        let local_encoder_available = FfmpegEncoder::new(config.encoder.clone())
            .check_availability()
            .await
            .is_ok();

        let capabilities = Self {
            remote_configured,
            local_encoder_available,
        };
        info!(
            "Detected capabilities: remote service {}, local encoder {}",
            if remote_configured { "configured" } else { "not configured" },
            if local_encoder_available { "available" } else { "missing" }
        );
        capabilities
    }
}

/// Initial strategy for a video. First match wins; the fallback chain absorbs mistakes.
pub fn select_strategy(capabilities: &Capabilities, metadata: &VideoMetadata) -> Strategy {
    let strategy = if capabilities.remote_configured {
        Strategy::RemoteService
    } else if capabilities.local_encoder_available {
        Strategy::LocalEncoder
    } else {
        Strategy::PassThrough
    };

    debug!(
        "Selected {} for {}",
        strategy,
        metadata.title.as_deref().unwrap_or("untitled video")
    );
    strategy
}
