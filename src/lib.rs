//! vidpipe - Video Optimization Pipeline
//!
//! Takes freshly uploaded videos, queues them by priority, and optimizes each
//! one through a remote transcoding service, a local encoder or a
//! pass-through, degrading tier by tier when a backend fails. Remote jobs are
//! finalized by a periodic reconciliation pass.

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod job;
pub mod media;
pub mod optimizer;
pub mod pipeline;
pub mod poller;
pub mod queue;
pub mod remote;
pub mod storage;
pub mod store;
pub mod strategy;
pub mod video;
