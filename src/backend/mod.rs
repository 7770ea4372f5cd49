// Interchangeable executors for one optimization attempt
//
// - Remote: hands the source to the remote transcoding service
// - Local: downloads, encodes with the local encoder, uploads
// - Passthrough: serves the source untouched and never fails
//
// Adapters share no state. Calling `run` twice re-processes the source.

pub mod local;
pub mod passthrough;
pub mod remote;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub use local::LocalEncoderBackend;
pub use passthrough::PassthroughBackend;
pub use remote::RemoteServiceBackend;

use crate::error::Result;
use crate::job::VideoMetadata;
use crate::strategy::Strategy;
use crate::video::OptimizationMethod;

/// Successful adapter result
#[derive(Debug, Clone, PartialEq)]
pub struct BackendOutput {
    pub method: OptimizationMethod,
    /// Where the playable result lives
    pub output_reference: Option<String>,
    /// Set when the work continues asynchronously on the remote service
    pub remote_handle: Option<String>,
    /// Diagnostic payload recorded on the video
    pub data: Value,
}

#[async_trait]
pub trait OptimizationBackend: Send + Sync {
    fn strategy(&self) -> Strategy;

    async fn run(&self, source_location: &str, metadata: &VideoMetadata) -> Result<BackendOutput>;
}

/// Adapters available to the optimizer, keyed by strategy
#[derive(Clone, Default)]
pub struct BackendSet {
    backends: HashMap<Strategy, Arc<dyn OptimizationBackend>>,
}

impl BackendSet {
    /// A set holding only the pass-through adapter.
    pub fn new() -> Self {
        Self::default().with(Arc::new(PassthroughBackend))
    }

    pub fn with(mut self, backend: Arc<dyn OptimizationBackend>) -> Self {
        self.backends.insert(backend.strategy(), backend);
        self
    }

    pub fn get(&self, strategy: Strategy) -> Option<&Arc<dyn OptimizationBackend>> {
        self.backends.get(&strategy)
    }
}
