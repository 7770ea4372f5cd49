//! vidpipe - Video Optimization Pipeline
//!
//! Command-line entry point. `enqueue` is called by the upload handler once a
//! raw file is in object storage; `drain` and `reconcile` are run by a
//! scheduler at a fixed interval.

use anyhow::Result;
use clap::Parser;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tracing_appender::{non_blocking, rolling};

use vidpipe::cli::{parse_key_value, Args, Commands, JobState};
use vidpipe::config::Config;
use vidpipe::error::PipelineError;
use vidpipe::job::{JobId, JobStatus, VideoId, VideoMetadata, Visibility};
use vidpipe::pipeline::{EnqueueOutcome, Pipeline};
use vidpipe::store::JobFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    match args.command {
        // Never reads the existing configuration, so a broken file can be replaced
        Commands::InitConfig { output } => {
            Config::default().save_to_file(&output)?;
            println!("Wrote default configuration to {}", output.display());
        }
        Commands::Enqueue { video_id, source, title, size, visibility, meta } => {
            let (_, pipeline) = open_pipeline(args.config.as_deref()).await?;
            let visibility = match visibility {
                Some(v) => Some(Visibility::parse(&v).ok_or_else(|| {
                    PipelineError::Config(format!(
                        "Invalid visibility '{}'. Valid values: public, unlisted, private",
                        v
                    ))
                })?),
                None => None,
            };

            let mut extra = BTreeMap::new();
            for pair in &meta {
                let (key, value) = parse_key_value(pair).ok_or_else(|| {
                    PipelineError::Config(format!("Invalid metadata '{}', expected KEY=VALUE", pair))
                })?;
                extra.insert(key, value);
            }

            let metadata = VideoMetadata { title, file_size: size, visibility, extra };
            match pipeline.enqueue(VideoId(video_id), &source, metadata).await {
                EnqueueOutcome::Deferred { job_id, priority } => {
                    println!("Queued job {} (priority {}); capacity full, deferred to next drain", job_id, priority);
                }
                EnqueueOutcome::Processed { job_id, priority, outcome } => {
                    println!("Job {} (priority {}) processed inline: {:?}", job_id, priority, outcome);
                }
                EnqueueOutcome::Errored { job_id, error } => {
                    let job = job_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string());
                    println!("Job {} errored: {}", job, error);
                }
            }
        }
        Commands::Drain { batch_size } => {
            let (_, pipeline) = open_pipeline(args.config.as_deref()).await?;
            let report = match batch_size {
                Some(batch_size) => pipeline.drain(batch_size).await?,
                None => pipeline.drain_default().await?,
            };

            println!("{:<8} {:<10} {:<10} {:<60}", "Job", "Video", "Priority", "Result");
            println!("{}", "-".repeat(88));
            for job in &report.jobs {
                println!("{:<8} {:<10} {:<10} {:<60}", job.job_id, job.video_id, job.priority, format!("{:?}", job.result));
            }
            println!("\n{} succeeded, {} failed", report.succeeded, report.failed);
            if let Some(reconciled) = &report.reconcile {
                println!(
                    "Reconciled {} remote jobs: {} completed, {} failed, {} pending",
                    reconciled.checked, reconciled.completed, reconciled.failed, reconciled.pending
                );
            }
        }
        Commands::Reconcile { limit } => {
            let (config, pipeline) = open_pipeline(args.config.as_deref()).await?;
            let limit = limit.unwrap_or(config.queue.reconcile_limit);
            let report = pipeline.reconcile(limit).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Requeue { job_id } => {
            let (_, pipeline) = open_pipeline(args.config.as_deref()).await?;
            let outcome = pipeline.requeue(JobId(job_id)).await?;
            println!("Requeued job {}: {:?}", job_id, outcome);
        }
        Commands::Status { video_id } => {
            let (_, pipeline) = open_pipeline(args.config.as_deref()).await?;
            match pipeline.video_state(VideoId(video_id)).await? {
                Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
                None => println!("No optimization state recorded for video {}", video_id),
            }
        }
        Commands::Jobs { state } => {
            let (_, pipeline) = open_pipeline(args.config.as_deref()).await?;
            let filter = match state {
                JobState::All => JobFilter::All,
                JobState::Queued => JobFilter::Status(JobStatus::Queued),
                JobState::Failed => JobFilter::Status(JobStatus::Failed),
            };
            let jobs = pipeline.list_jobs(filter).await?;

            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                println!("{:<8} {:<10} {:<10} {:<8} {:<26} {:<40}", "Job", "Video", "Priority", "Status", "Created", "Error");
                println!("{}", "-".repeat(106));
                for job in jobs {
                    println!(
                        "{:<8} {:<10} {:<10} {:<8} {:<26} {:<40}",
                        job.id,
                        job.video_id,
                        job.priority,
                        job.status,
                        job.created_at.format("%Y-%m-%d %H:%M:%S"),
                        job.error_message.unwrap_or_default()
                    );
                }
            }
        }
        Commands::Stats => {
            let (_, pipeline) = open_pipeline(args.config.as_deref()).await?;
            let stats = pipeline.queue_stats().await?;
            let capabilities = pipeline.capabilities();
            println!("Queued jobs:       {}", stats.queued);
            println!("Failed jobs:       {}", stats.failed);
            println!("Processing videos: {} / {}", stats.processing, stats.max_concurrent);
            println!("Remote service:    {}", if capabilities.remote_configured { "configured" } else { "not configured" });
            println!("Local encoder:     {}", if capabilities.local_encoder_available { "available" } else { "missing" });
        }
    }

    Ok(())
}

/// Load the configuration and build the pipeline from it
async fn open_pipeline(config_path: Option<&Path>) -> Result<(Config, Pipeline)> {
    let mut config = match config_path {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            // Try to load config.toml from current directory first
            if Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };
    config.apply_env_overrides();

    let pipeline = Pipeline::from_config(&config).await?;
    Ok((config, pipeline))
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = std::env::current_dir()?.join(".vidpipe").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "vidpipe.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    // Determine log level
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Console output goes to stderr so command output on stdout stays clean
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    // Create file layer
    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    // Setup layered subscriber
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized - console: {}, file: {}",
          log_level, log_dir.join("vidpipe.log").display());

    Ok(())
}
