//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use hls_accel::cache::CacheStore;
use hls_accel::database::models::TaskStatus;
use hls_accel::database::repositories::{SqlxTaskRepository, TaskRepository};
use hls_accel::database::{DbPool, init_pool, run_migrations};
use hls_accel::engine::{ActiveJob, EngineError, FetchEngine, FetchRequest, JobHandle};
use hls_accel::task::TaskManager;

pub const MARKER_SUFFIX: &str = ".aria2";

/// File-backed database with migrations applied. Every pooled connection sees
/// the same data, unlike `sqlite::memory:`.
pub async fn setup_test_db(dir: &TempDir) -> DbPool {
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("tasks.db").display());
    let pool = init_pool(&url).await.expect("Failed to create test pool");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// One call received by [`RecordingEngine`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Submit { url: String, filename: String },
    Cancel(String),
    Forget(String),
}

/// In-process engine that records calls and never touches the filesystem.
#[derive(Default)]
pub struct RecordingEngine {
    calls: Mutex<Vec<EngineCall>>,
    next_gid: AtomicU64,
    failing_urls: Mutex<HashSet<String>>,
    /// Directory whose presence is sampled on every cancel.
    watched_dir: Mutex<Option<PathBuf>>,
    dir_present_at_cancel: Mutex<Vec<bool>>,
    /// Stop this task from inside the first submit, as a concurrent operator would.
    stop_during_submit: Mutex<Option<(Arc<dyn TaskRepository>, String)>>,
}

impl RecordingEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_url(&self, url: &str) {
        self.failing_urls.lock().unwrap().insert(url.to_string());
    }

    pub fn watch_dir(&self, dir: PathBuf) {
        *self.watched_dir.lock().unwrap() = Some(dir);
    }

    pub fn dir_present_at_cancel(&self) -> Vec<bool> {
        self.dir_present_at_cancel.lock().unwrap().clone()
    }

    pub fn stop_during_submit(&self, repo: Arc<dyn TaskRepository>, task_id: &str) {
        *self.stop_during_submit.lock().unwrap() = Some((repo, task_id.to_string()));
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn submitted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::Submit { filename, .. } => Some(filename),
                _ => None,
            })
            .collect()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::Cancel(gid) => Some(gid),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl FetchEngine for RecordingEngine {
    async fn submit(&self, request: &FetchRequest) -> Result<JobHandle, EngineError> {
        if self.failing_urls.lock().unwrap().contains(&request.url) {
            return Err(EngineError::Rpc {
                code: 1,
                message: "refused".to_string(),
            });
        }
        let stopper = self.stop_during_submit.lock().unwrap().take();
        if let Some((repo, task_id)) = stopper {
            repo.update_status(&task_id, TaskStatus::Stopped).await.unwrap();
        }

        let gid = format!("gid{:04}", self.next_gid.fetch_add(1, Ordering::SeqCst) + 1);
        self.calls.lock().unwrap().push(EngineCall::Submit {
            url: request.url.clone(),
            filename: request.target_filename.clone(),
        });
        Ok(JobHandle(gid))
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<(), EngineError> {
        let watched = self.watched_dir.lock().unwrap().clone();
        if let Some(dir) = watched {
            self.dir_present_at_cancel.lock().unwrap().push(dir.exists());
        }
        self.calls
            .lock()
            .unwrap()
            .push(EngineCall::Cancel(handle.as_str().to_string()));
        Ok(())
    }

    async fn forget_result(&self, handle: &JobHandle) -> Result<(), EngineError> {
        self.calls
            .lock()
            .unwrap()
            .push(EngineCall::Forget(handle.as_str().to_string()));
        Ok(())
    }

    async fn active_jobs(&self) -> Result<Vec<ActiveJob>, EngineError> {
        Ok(Vec::new())
    }

    async fn version(&self) -> Result<String, EngineError> {
        Ok("test-engine".to_string())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub pool: DbPool,
    pub repo: Arc<dyn TaskRepository>,
    pub engine: Arc<RecordingEngine>,
    pub manager: Arc<TaskManager>,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let pool = setup_test_db(&dir).await;
        let repo: Arc<dyn TaskRepository> = Arc::new(SqlxTaskRepository::new(pool.clone()));
        let engine = RecordingEngine::new();
        let cache = CacheStore::new(dir.path().join("cache"), MARKER_SUFFIX).unwrap();

        let mut headers = BTreeMap::new();
        headers.insert("User-Agent".to_string(), "hls-accel-test".to_string());

        let manager = Arc::new(TaskManager::new(
            Arc::clone(&repo),
            engine.clone(),
            cache,
            headers,
        ));

        Self {
            dir,
            pool,
            repo,
            engine,
            manager,
        }
    }

    pub fn cache(&self) -> &CacheStore {
        self.manager.cache()
    }

    /// Write a finished file into the task's cache directory.
    pub fn write_complete(&self, task_id: &str, filename: &str, body: &[u8]) {
        let path = self.cache().file_path(task_id, filename).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    /// Write a file plus the engine's in-progress marker beside it.
    pub fn write_partial(&self, task_id: &str, filename: &str) {
        self.write_complete(task_id, filename, b"partial");
        let path = self.cache().file_path(task_id, filename).unwrap();
        let mut marker = path.into_os_string();
        marker.push(MARKER_SUFFIX);
        std::fs::write(marker, b"").unwrap();
    }
}
