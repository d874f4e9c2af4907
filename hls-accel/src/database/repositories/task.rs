//! Task repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{NewTaskItem, TaskDbModel, TaskItemDbModel, TaskStatus};
use crate::database::time::now_ms;
use crate::{Error, Result};

/// Columns selected by list views; the playlist body is left out.
const TASK_SUMMARY_COLUMNS: &str = "id, original_url, total_segments, created_at, status";

/// Task repository trait.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a task. Fails with [`Error::AlreadyExists`] when the id is taken.
    async fn create_task(&self, task: &TaskDbModel) -> Result<()>;
    async fn get_task(&self, id: &str) -> Result<TaskDbModel>;
    /// `None` when no task with this id exists.
    async fn check_exists(&self, id: &str) -> Result<Option<TaskStatus>>;
    /// Stored playlist body, `None` when the task is missing or has none yet.
    async fn get_proxied_content(&self, id: &str) -> Result<Option<String>>;
    async fn list_tasks(&self) -> Result<Vec<TaskDbModel>>;
    async fn list_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<TaskDbModel>>;
    async fn update_status(&self, id: &str, status: TaskStatus) -> Result<()>;
    /// Set `to` only if the row is currently `from`. Returns whether it changed.
    ///
    /// Fails with [`Error::InvalidStateTransition`] when `from -> to` is not a
    /// lifecycle edge.
    async fn transition_status(&self, id: &str, from: TaskStatus, to: TaskStatus) -> Result<bool>;
    async fn update_proxied_content(&self, id: &str, content: &str) -> Result<()>;
    /// Move a stopped task back to downloading with a fresh playlist.
    async fn restart_task(&self, id: &str, total_segments: usize, content: &str) -> Result<bool>;
    async fn delete_task(&self, id: &str) -> Result<()>;

    // Items
    /// Insert-or-ignore on `(task_id, filename)`. Returns whether a row was added.
    async fn create_task_item(&self, item: &NewTaskItem) -> Result<bool>;
    async fn get_task_items(&self, task_id: &str) -> Result<Vec<TaskItemDbModel>>;
    async fn get_job_handles(&self, task_id: &str) -> Result<Vec<String>>;
    async fn delete_task_items(&self, task_id: &str) -> Result<u64>;
    async fn delete_task_item(&self, task_id: &str, filename: &str) -> Result<bool>;
}

/// SQLx implementation of TaskRepository.
pub struct SqlxTaskRepository {
    pool: SqlitePool,
}

impl SqlxTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for SqlxTaskRepository {
    async fn create_task(&self, task: &TaskDbModel) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO tasks (id, original_url, total_segments, created_at, status, proxied_content)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&task.id)
        .bind(&task.original_url)
        .bind(task.total_segments)
        .bind(task.created_at)
        .bind(&task.status)
        .bind(&task.proxied_content)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::already_exists("Task", &task.id));
        }
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<TaskDbModel> {
        sqlx::query_as::<_, TaskDbModel>("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Task", id))
    }

    async fn check_exists(&self, id: &str) -> Result<Option<TaskStatus>> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match status {
            None => Ok(None),
            Some(s) => TaskStatus::parse(&s)
                .map(Some)
                .ok_or_else(|| Error::Database(format!("Unknown task status '{s}' for {id}"))),
        }
    }

    async fn get_proxied_content(&self, id: &str) -> Result<Option<String>> {
        let content: Option<Option<String>> =
            sqlx::query_scalar("SELECT proxied_content FROM tasks WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(content.flatten().filter(|c| !c.is_empty()))
    }

    async fn list_tasks(&self) -> Result<Vec<TaskDbModel>> {
        let tasks = sqlx::query_as::<_, TaskDbModel>(&format!(
            "SELECT {TASK_SUMMARY_COLUMNS} FROM tasks ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }

    async fn list_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<TaskDbModel>> {
        let tasks = sqlx::query_as::<_, TaskDbModel>(&format!(
            "SELECT {TASK_SUMMARY_COLUMNS} FROM tasks WHERE status = ? ORDER BY created_at DESC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }

    async fn update_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let result = sqlx::query("UPDATE tasks SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Task", id));
        }
        Ok(())
    }

    async fn transition_status(&self, id: &str, from: TaskStatus, to: TaskStatus) -> Result<bool> {
        if !from.can_transition_to(to) {
            return Err(Error::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        let result = sqlx::query("UPDATE tasks SET status = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_proxied_content(&self, id: &str, content: &str) -> Result<()> {
        let result = sqlx::query("UPDATE tasks SET proxied_content = ? WHERE id = ?")
            .bind(content)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Task", id));
        }
        Ok(())
    }

    async fn restart_task(&self, id: &str, total_segments: usize, content: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                status = ?,
                total_segments = ?,
                proxied_content = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(TaskStatus::Downloading.as_str())
        .bind(total_segments as i64)
        .bind(content)
        .bind(id)
        .bind(TaskStatus::Stopped.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_task_item(&self, item: &NewTaskItem) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO task_item (task_id, filename, job_handle, url, kind, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.task_id)
        .bind(&item.filename)
        .bind(&item.job_handle)
        .bind(&item.url)
        .bind(&item.kind)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_task_items(&self, task_id: &str) -> Result<Vec<TaskItemDbModel>> {
        let items = sqlx::query_as::<_, TaskItemDbModel>(
            "SELECT * FROM task_item WHERE task_id = ? ORDER BY id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn get_job_handles(&self, task_id: &str) -> Result<Vec<String>> {
        let handles = sqlx::query_scalar::<_, String>(
            "SELECT job_handle FROM task_item WHERE task_id = ? ORDER BY id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(handles)
    }

    async fn delete_task_items(&self, task_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM task_item WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_task_item(&self, task_id: &str, filename: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM task_item WHERE task_id = ? AND filename = ?")
            .bind(task_id)
            .bind(filename)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
