//! Fetch engine trait and related types.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::EngineError;

/// Opaque handle the engine returns for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(pub String);

impl JobHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request to fetch one URL into one file.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    /// Absolute target directory.
    pub target_dir: PathBuf,
    pub target_filename: String,
    pub headers: BTreeMap<String, String>,
}

impl FetchRequest {
    pub fn new(
        url: impl Into<String>,
        target_dir: impl Into<PathBuf>,
        target_filename: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            target_dir: target_dir.into(),
            target_filename: target_filename.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

/// A job the engine is currently running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveJob {
    pub handle: JobHandle,
    pub dir: PathBuf,
}

/// An external engine that downloads files in the background.
///
/// Implementations must be safe to call concurrently. The engine is expected to
/// leave an in-progress marker beside targets it has not finished writing.
#[async_trait]
pub trait FetchEngine: Send + Sync {
    /// Queue a download and return its handle.
    async fn submit(&self, request: &FetchRequest) -> Result<JobHandle, EngineError>;

    /// Force-cancel a job.
    async fn cancel(&self, handle: &JobHandle) -> Result<(), EngineError>;

    /// Drop the engine's record of a finished, failed or cancelled job.
    async fn forget_result(&self, handle: &JobHandle) -> Result<(), EngineError>;

    /// Jobs currently downloading.
    async fn active_jobs(&self) -> Result<Vec<ActiveJob>, EngineError>;

    /// Engine version string, used as a liveness probe.
    async fn version(&self) -> Result<String, EngineError>;
}
