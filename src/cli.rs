use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue an uploaded video for optimization, processing it right away if capacity allows
    Enqueue {
        /// Video id in the video table
        #[arg(long)]
        video_id: u64,

        /// URL of the unprocessed upload
        #[arg(short, long)]
        source: String,

        /// Video title
        #[arg(short, long)]
        title: Option<String>,

        /// Declared file size in bytes
        #[arg(long)]
        size: Option<u64>,

        /// Visibility: public, unlisted or private
        #[arg(long)]
        visibility: Option<String>,

        /// Extra metadata hints (key=value, repeatable)
        #[arg(short, long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },

    /// Process queued jobs in priority order, then reconcile remote jobs
    Drain {
        /// Maximum number of jobs to process (defaults to the configured batch size)
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Check the remote service for delegated videos and finalize finished ones
    Reconcile {
        /// Maximum number of videos to check (defaults to the configured limit)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Re-submit a failed job
    Requeue {
        /// Failed job id
        #[arg(long)]
        job_id: u64,
    },

    /// Show the optimization state of a video
    Status {
        /// Video id
        #[arg(long)]
        video_id: u64,
    },

    /// List jobs in processing order
    Jobs {
        /// Which jobs to list
        #[arg(long, value_enum, default_value = "all")]
        state: JobState,
    },

    /// Show queue counters
    Stats,

    /// Write the default configuration to a file
    InitConfig {
        /// Output path
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum JobState {
    All,
    Queued,
    Failed,
}

/// Parse `KEY=VALUE`; the value is read as JSON when it parses, as a plain string otherwise.
pub fn parse_key_value(pair: &str) -> Option<(String, serde_json::Value)> {
    let (key, value) = pair.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let value = serde_json::from_str(value.trim())
        .unwrap_or_else(|_| serde_json::Value::String(value.trim().to_string()));
    Some((key.to_string(), value))
}
