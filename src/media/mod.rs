// Local encoder abstraction
//
// - Commands: command builder and process execution
// - Encoder: trait the local backend depends on, with the ffmpeg implementation

pub mod commands;

use async_trait::async_trait;
use std::path::Path;
use tracing::info;

pub use commands::*;

use crate::config::EncoderConfig;
use crate::error::Result;

/// Local transcoder invoked by the local encoder backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Transcode `input_path` into `output_path` with the fixed quality profile
    async fn transcode(&self, input_path: &Path, output_path: &Path) -> Result<()>;

    /// Check if the encoder binary runs
    async fn check_availability(&self) -> Result<()>;
}

/// ffmpeg-based encoder
pub struct FfmpegEncoder {
    config: EncoderConfig,
    command_builder: MediaCommandBuilder,
}

impl FfmpegEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        let command_builder = MediaCommandBuilder::new(&config.binary_path);
        Self {
            config,
            command_builder,
        }
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn transcode(&self, input_path: &Path, output_path: &Path) -> Result<()> {
        info!("Transcoding {} -> {}", input_path.display(), output_path.display());

        self.command_builder
            .optimize(input_path, output_path, &self.config)
            .execute()
            .await?;

        info!("Transcode completed");
        Ok(())
    }

    async fn check_availability(&self) -> Result<()> {
        self.command_builder.version_check().execute().await?;
        info!("Encoder {} is available", self.config.binary_path);
        Ok(())
    }
}
