//! Task orchestrator.
//!
//! Bridges the task repository (rows) and the cache store (files). Neither side
//! is trusted to imply the other: a task item row only says a job was handed to
//! the engine, and a file only counts once the engine's marker is gone.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use hls_rewrite::{FetchItem, FetchKind, VariantRewrite};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::cache::CacheStore;
use crate::database::models::{NewTaskItem, TaskDbModel, TaskStatus};
use crate::database::repositories::TaskRepository;
use crate::engine::{FetchEngine, FetchRequest, JobHandle};
use crate::{Error, Result};

/// Who asked for a task to be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOrigin {
    /// A player requested the variant playlist through the proxy.
    Player,
    /// An operator added the URL through the API.
    Api,
}

/// What to do with a start request given the current task row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationDecision {
    Create,
    /// Bring a stopped task back to downloading.
    Resurrect,
    Skip(TaskStatus),
}

/// Idempotent creation policy.
///
/// Live tasks are never duplicated. Stopped tasks stay stopped when a player
/// merely polls the playlist; only a deliberate API add restarts them.
pub fn creation_decision(existing: Option<TaskStatus>, origin: TriggerOrigin) -> CreationDecision {
    match (existing, origin) {
        (None, _) => CreationDecision::Create,
        (Some(TaskStatus::Stopped), TriggerOrigin::Api) => CreationDecision::Resurrect,
        (Some(status), _) => CreationDecision::Skip(status),
    }
}

/// Everything needed to create a task and dispatch its files.
#[derive(Debug, Clone)]
pub struct TaskPlan {
    pub task_id: String,
    pub original_url: String,
    pub proxied_content: String,
    pub total_segments: usize,
    pub items: Vec<FetchItem>,
}

impl TaskPlan {
    pub fn from_rewrite(
        task_id: impl Into<String>,
        original_url: impl Into<String>,
        rewrite: VariantRewrite,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            original_url: original_url.into(),
            proxied_content: rewrite.content,
            total_segments: rewrite.total_segments,
            items: rewrite.items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The task row was written (created or restarted) and its files dispatched.
    Started(DispatchSummary),
    /// Another trigger won the creation race.
    AlreadyExists,
    Skipped(TaskStatus),
}

/// Per-call dispatch counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub submitted: usize,
    /// Already complete in the cache.
    pub cached: usize,
    /// Already registered by an earlier dispatch.
    pub duplicate: usize,
    pub failed: usize,
}

/// A task with its reconciled progress.
#[derive(Debug, Clone)]
pub struct TaskProgress {
    pub task: TaskDbModel,
    pub downloaded_segments: i64,
}

pub struct TaskManager {
    repo: Arc<dyn TaskRepository>,
    engine: Arc<dyn FetchEngine>,
    cache: CacheStore,
    headers: BTreeMap<String, String>,
    tracker: TaskTracker,
}

impl TaskManager {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        engine: Arc<dyn FetchEngine>,
        cache: CacheStore,
        headers: BTreeMap<String, String>,
    ) -> Self {
        Self {
            repo,
            engine,
            cache,
            headers,
            tracker: TaskTracker::new(),
        }
    }

    pub fn repository(&self) -> &Arc<dyn TaskRepository> {
        &self.repo
    }

    pub fn engine(&self) -> &Arc<dyn FetchEngine> {
        &self.engine
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Decision for `task_id` given its current row.
    pub async fn decide(&self, task_id: &str, origin: TriggerOrigin) -> Result<CreationDecision> {
        let existing = self.repo.check_exists(task_id).await?;
        Ok(creation_decision(existing, origin))
    }

    /// Run `fut` in the background, tracked so it can be awaited by
    /// [`wait_idle`](Self::wait_idle) and drained on shutdown.
    pub fn spawn_background<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(fut);
    }

    /// Start `plan` in the background. The caller never waits for it.
    pub fn spawn_start(self: &Arc<Self>, plan: TaskPlan, origin: TriggerOrigin) {
        let this = Arc::clone(self);
        self.tracker.spawn(async move {
            let task_id = plan.task_id.clone();
            if let Err(e) = this.start_task(plan, origin).await {
                error!(task_id = %task_id, error = %e, "Failed to start task");
            }
        });
    }

    /// Wait until every background job spawned so far has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Stop accepting background work and wait for what is in flight.
    pub async fn shutdown(&self) {
        self.tracker.close();
        if !self.tracker.is_empty() {
            info!(
                pending = self.tracker.len(),
                "Waiting for background task work to finish"
            );
        }
        self.tracker.wait().await;
    }

    /// Create (or restart) the task described by `plan` and dispatch its files.
    pub async fn start_task(&self, plan: TaskPlan, origin: TriggerOrigin) -> Result<StartOutcome> {
        let task_id = plan.task_id.as_str();

        match self.decide(task_id, origin).await? {
            CreationDecision::Skip(status) => {
                debug!(task_id, %status, "Task already known, not starting");
                return Ok(StartOutcome::Skipped(status));
            }
            CreationDecision::Create => {
                self.cache.ensure_task_dir(task_id).await?;

                let task = TaskDbModel::new(
                    task_id,
                    &plan.original_url,
                    plan.total_segments,
                    &plan.proxied_content,
                );
                match self.repo.create_task(&task).await {
                    Ok(()) => {
                        info!(
                            task_id,
                            url = %plan.original_url,
                            total_segments = plan.total_segments,
                            "Created task"
                        );
                    }
                    Err(e) if e.is_already_exists() => {
                        debug!(task_id, "Lost task creation race");
                        self.backfill_content(task_id, &plan.proxied_content).await;
                        return Ok(StartOutcome::AlreadyExists);
                    }
                    Err(e) => return Err(e),
                }
            }
            CreationDecision::Resurrect => {
                self.cache.ensure_task_dir(task_id).await?;

                let restarted = self
                    .repo
                    .restart_task(task_id, plan.total_segments, &plan.proxied_content)
                    .await?;
                if !restarted {
                    debug!(task_id, "Task left the stopped state before restart");
                    return Ok(StartOutcome::AlreadyExists);
                }
                let (kept, stale) = self.prune_items_for_restart(task_id, &plan.items).await?;
                info!(task_id, kept_items = kept, stale_items = stale, "Restarted stopped task");
            }
        }

        let summary = self.trigger_downloads(task_id, &plan.items).await?;
        Ok(StartOutcome::Started(summary))
    }

    /// Drop the item rows a restart will re-dispatch.
    ///
    /// Rows whose file is complete and still listed in the new playlist are
    /// kept, since dispatch skips cached files and progress counts rows. The
    /// old handles were cancelled when the task was stopped.
    async fn prune_items_for_restart(
        &self,
        task_id: &str,
        items: &[FetchItem],
    ) -> Result<(usize, usize)> {
        let wanted: HashSet<&str> = items.iter().map(|i| i.filename.as_str()).collect();
        let (mut kept, mut stale) = (0, 0);

        for row in self.repo.get_task_items(task_id).await? {
            let complete = wanted.contains(row.filename.as_str())
                && self
                    .cache
                    .is_complete(task_id, &row.filename)
                    .await
                    .unwrap_or(false);
            if complete {
                kept += 1;
            } else {
                self.repo.delete_task_item(task_id, &row.filename).await?;
                stale += 1;
            }
        }
        Ok((kept, stale))
    }

    async fn backfill_content(&self, task_id: &str, content: &str) {
        match self.repo.get_proxied_content(task_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                if let Err(e) = self.repo.update_proxied_content(task_id, content).await {
                    warn!(task_id, error = %e, "Failed to backfill proxied content");
                }
            }
            Err(e) => warn!(task_id, error = %e, "Failed to read proxied content"),
        }
    }

    /// Hand every not-yet-cached item to the engine and record its handle.
    ///
    /// Per-item failures are logged and skipped. If the task is found stopped
    /// once dispatch is done, the jobs submitted by this call are cancelled.
    pub async fn trigger_downloads(
        &self,
        task_id: &str,
        items: &[FetchItem],
    ) -> Result<DispatchSummary> {
        let dir = self.cache.task_dir(task_id)?;
        let mut summary = DispatchSummary::default();
        let mut submitted: Vec<JobHandle> = Vec::new();

        for item in items {
            match self.cache.is_complete(task_id, &item.filename).await {
                Ok(true) => {
                    summary.cached += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(task_id, filename = %item.filename, error = %e, "Skipping unusable item");
                    summary.failed += 1;
                    continue;
                }
            }

            let request = FetchRequest::new(&item.url, &dir, &item.filename)
                .with_headers(self.headers.clone());

            let handle = match self.engine.submit(&request).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(
                        task_id,
                        filename = %item.filename,
                        url = %item.url,
                        error = %e,
                        "Failed to dispatch fetch"
                    );
                    summary.failed += 1;
                    continue;
                }
            };

            let row = NewTaskItem {
                task_id: task_id.to_string(),
                filename: item.filename.clone(),
                job_handle: handle.to_string(),
                url: item.url.clone(),
                kind: item.kind.as_str().to_string(),
            };

            match self.repo.create_task_item(&row).await {
                Ok(true) => {
                    summary.submitted += 1;
                    submitted.push(handle);
                }
                Ok(false) => {
                    // The registered job owns this file; drop the extra one.
                    debug!(task_id, filename = %item.filename, handle = %handle, "Item already registered");
                    summary.duplicate += 1;
                    if let Err(e) = self.engine.cancel(&handle).await {
                        debug!(handle = %handle, error = %e, "Failed to cancel duplicate job");
                    }
                }
                Err(e) => {
                    warn!(
                        task_id,
                        filename = %item.filename,
                        handle = %handle,
                        error = %e,
                        "Failed to record dispatched fetch"
                    );
                    summary.failed += 1;
                    submitted.push(handle);
                }
            }
        }

        self.cancel_if_stopped(task_id, &submitted).await;

        info!(
            task_id,
            submitted = summary.submitted,
            cached = summary.cached,
            duplicate = summary.duplicate,
            failed = summary.failed,
            "Dispatch finished"
        );
        Ok(summary)
    }

    /// A stop that lands while dispatch is running only cancels the handles it
    /// could see. Catch the rest here.
    async fn cancel_if_stopped(&self, task_id: &str, late: &[JobHandle]) {
        if late.is_empty() {
            return;
        }
        match self.repo.check_exists(task_id).await {
            Ok(Some(TaskStatus::Downloading)) | Ok(Some(TaskStatus::Completed)) => {}
            Ok(status) => {
                let handles: Vec<&str> = late.iter().map(JobHandle::as_str).collect();
                warn!(
                    task_id,
                    status = ?status,
                    handles = ?handles,
                    "Task was stopped during dispatch; cancelling late jobs"
                );
                for handle in late {
                    if let Err(e) = self.engine.cancel(handle).await {
                        debug!(handle = %handle, error = %e, "Failed to cancel late job");
                    }
                }
            }
            Err(e) => warn!(task_id, error = %e, "Failed to re-check task status after dispatch"),
        }
    }

    /// Number of segment items whose file is complete in the cache.
    pub async fn count_complete_segments(&self, task_id: &str) -> Result<i64> {
        let items = self.repo.get_task_items(task_id).await?;
        let mut count = 0;
        for item in items
            .iter()
            .filter(|i| FetchKind::parse(&i.kind) == Some(FetchKind::Segment))
        {
            if self
                .cache
                .is_complete(task_id, &item.filename)
                .await
                .unwrap_or(false)
            {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Reconcile one task's progress.
    ///
    /// A downloading task whose segments are all cached is reported as
    /// completed right away; the stored status is flipped in the background.
    pub async fn progress_of(&self, mut task: TaskDbModel) -> Result<TaskProgress> {
        let status = task.status();
        if status == TaskStatus::Completed {
            return Ok(TaskProgress {
                downloaded_segments: task.total_segments,
                task,
            });
        }

        let mut downloaded = self.count_complete_segments(&task.id).await?;

        if status == TaskStatus::Downloading
            && task.total_segments > 0
            && downloaded >= task.total_segments
        {
            downloaded = task.total_segments;
            task.status = TaskStatus::Completed.as_str().to_string();

            let repo = Arc::clone(&self.repo);
            let task_id = task.id.clone();
            self.tracker.spawn(async move {
                match repo
                    .transition_status(&task_id, TaskStatus::Downloading, TaskStatus::Completed)
                    .await
                {
                    Ok(true) => info!(task_id = %task_id, "Task completed"),
                    Ok(false) => debug!(task_id = %task_id, "Task left downloading before completion flip"),
                    Err(e) => warn!(task_id = %task_id, error = %e, "Failed to mark task completed"),
                }
            });
        }

        Ok(TaskProgress {
            task,
            downloaded_segments: downloaded,
        })
    }

    /// All tasks, newest first, with reconciled progress.
    pub async fn list_with_progress(&self) -> Result<Vec<TaskProgress>> {
        let tasks = self.repo.list_tasks().await?;
        let mut out = Vec::with_capacity(tasks.len());
        for task in tasks {
            out.push(self.progress_of(task).await?);
        }
        Ok(out)
    }

    pub async fn get_with_progress(&self, task_id: &str) -> Result<TaskProgress> {
        let mut task = self.repo.get_task(task_id).await?;
        task.proxied_content = None;
        self.progress_of(task).await
    }

    /// Mark the task stopped, then cancel every recorded job.
    ///
    /// Stopping an already stopped task re-sends the cancels.
    pub async fn stop_task(&self, task_id: &str) -> Result<()> {
        self.repo.update_status(task_id, TaskStatus::Stopped).await?;

        let handles = self.repo.get_job_handles(task_id).await?;
        let mut cancelled = 0usize;
        for handle in handles.iter().map(|h| JobHandle(h.clone())) {
            match self.engine.cancel(&handle).await {
                Ok(()) => cancelled += 1,
                // Finished or already removed jobs reject the cancel.
                Err(e) => debug!(task_id, handle = %handle, error = %e, "Cancel failed"),
            }
        }

        info!(task_id, jobs = handles.len(), cancelled, "Stopped task");
        Ok(())
    }

    /// Remove a task that is not downloading: engine jobs, cache directory,
    /// item rows and the task row, in that order.
    pub async fn delete_task(&self, task_id: &str) -> Result<()> {
        let task = self.repo.get_task(task_id).await?;
        if task.status() == TaskStatus::Downloading {
            return Err(Error::TaskActive {
                id: task_id.to_string(),
            });
        }

        let handles = self.repo.get_job_handles(task_id).await?;
        for handle in handles.iter().map(|h| JobHandle(h.clone())) {
            if let Err(e) = self.engine.cancel(&handle).await {
                debug!(task_id, handle = %handle, error = %e, "Cancel failed");
            }
            if let Err(e) = self.engine.forget_result(&handle).await {
                debug!(task_id, handle = %handle, error = %e, "Forget result failed");
            }
        }

        if let Err(e) = self.cache.remove_task_dir(task_id).await {
            error!(task_id, error = %e, "Failed to remove task cache; task kept");
            return Err(e);
        }

        let removed_items = self.repo.delete_task_items(task_id).await?;
        self.repo.delete_task(task_id).await?;

        info!(task_id, removed_items, "Deleted task");
        Ok(())
    }

    /// Log tasks left downloading by a previous run, plus what the engine is
    /// still working on for them.
    pub async fn report_unfinished(&self) {
        let tasks = match self.repo.list_tasks_by_status(TaskStatus::Downloading).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "Failed to list unfinished tasks");
                return;
            }
        };
        if tasks.is_empty() {
            return;
        }

        let active = match self.engine.active_jobs().await {
            Ok(jobs) => Some(jobs),
            Err(e) => {
                warn!(error = %e, "Fetch engine unreachable; cannot report active jobs");
                None
            }
        };

        for task in &tasks {
            let running = active.as_ref().map(|jobs| {
                let dir = self.cache.task_dir(&task.id).ok();
                jobs.iter()
                    .filter(|j| dir.as_deref() == Some(j.dir.as_path()))
                    .count()
            });
            info!(
                task_id = %task.id,
                url = %task.original_url,
                total_segments = task.total_segments,
                active_jobs = ?running,
                "Task still downloading from a previous run"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation_decision() {
        use CreationDecision::*;
        use TaskStatus::*;

        assert_eq!(creation_decision(None, TriggerOrigin::Player), Create);
        assert_eq!(creation_decision(None, TriggerOrigin::Api), Create);
        assert_eq!(
            creation_decision(Some(Downloading), TriggerOrigin::Player),
            Skip(Downloading)
        );
        assert_eq!(
            creation_decision(Some(Completed), TriggerOrigin::Api),
            Skip(Completed)
        );
        assert_eq!(
            creation_decision(Some(Stopped), TriggerOrigin::Player),
            Skip(Stopped)
        );
        assert_eq!(creation_decision(Some(Stopped), TriggerOrigin::Api), Resurrect);
    }
}
