use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::config::EncoderConfig;
use crate::error::{Result, PipelineError};

/// Abstract media processing command representation
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
    pub timeout: Option<Duration>,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
            timeout: None,
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Kill the process if it runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Set video codec
    pub fn video_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    /// Set audio codec
    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    pub fn audio_bitrate<S: Into<String>>(self, bitrate: S) -> Self {
        self.arg("-b:a").arg(bitrate)
    }

    pub fn crf(self, crf: u32) -> Self {
        self.arg("-crf").arg(crf.to_string())
    }

    pub fn preset<S: Into<String>>(self, preset: S) -> Self {
        self.arg("-preset").arg(preset)
    }

    /// Move the moov atom to the front so playback can start before the download ends
    pub fn faststart(self) -> Self {
        self.arg("-movflags").arg("+faststart")
    }

    /// Execute the command
    pub async fn execute(&self) -> Result<()> {
        debug!("Executing media processing command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let child = Command::new(&self.binary_path)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::Encoder(format!("Failed to execute media processor: {}", e)))?;

        let output = match self.timeout {
            // Dropping the future on expiry drops the child, which kills it
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| PipelineError::Timeout(limit.as_secs(), self.description.clone()))??,
            None => child.wait_with_output().await?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Encoder(format!(
                "{} failed ({}): {}",
                self.description,
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// Builder for the encoder invocations the pipeline needs
pub struct MediaCommandBuilder {
    binary_path: String,
}

impl MediaCommandBuilder {
    /// Create a new command builder
    pub fn new<S: Into<String>>(binary_path: S) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    /// Build the web-playback transcode with the configured quality profile
    pub fn optimize<P: AsRef<Path>>(
        &self,
        input_path: P,
        output_path: P,
        profile: &EncoderConfig,
    ) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Video optimization")
            .overwrite()
            .input(input_path)
            .video_codec(&profile.video_codec)
            .crf(profile.crf)
            .preset(&profile.preset)
            .audio_codec(&profile.audio_codec)
            .audio_bitrate(&profile.audio_bitrate)
            .faststart()
            .args(profile.extra_options.iter().cloned())
            .output(output_path)
            .with_timeout(profile.timeout())
    }

    /// Build version check command
    pub fn version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Version check")
            .arg("-version")
            .with_timeout(Duration::from_secs(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimize_arguments() {
        let mut profile = EncoderConfig::default();
        profile.extra_options = vec!["-pix_fmt".to_string(), "yuv420p".to_string()];

        let cmd = MediaCommandBuilder::new("ffmpeg").optimize(
            Path::new("/tmp/in.mov"),
            Path::new("/tmp/out.mp4"),
            &profile,
        );

        assert_eq!(cmd.binary_path, "ffmpeg");
        assert_eq!(
            cmd.args,
            vec![
                "-y", "-i", "/tmp/in.mov", "-c:v", "libx264", "-crf", "23", "-preset", "medium",
                "-c:a", "aac", "-b:a", "128k", "-movflags", "+faststart", "-pix_fmt", "yuv420p",
                "/tmp/out.mp4",
            ]
        );
        assert_eq!(cmd.timeout, Some(Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_encoder_error() {
        let result = MediaCommandBuilder::new("/nonexistent/vidpipe-ffmpeg")
            .version_check()
            .execute()
            .await;
        assert!(matches!(result, Err(PipelineError::Encoder(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_encoder_error() {
        let result = MediaCommand::new("false", "Always fails").execute().await;
        assert!(matches!(result, Err(PipelineError::Encoder(msg)) if msg.contains("Always fails")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process() {
        let result = MediaCommand::new("sleep", "Sleep")
            .arg("5")
            .with_timeout(Duration::from_millis(100))
            .execute()
            .await;
        assert!(matches!(result, Err(PipelineError::Timeout(_, _))));
    }
}
