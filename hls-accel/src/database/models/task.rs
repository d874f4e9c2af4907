//! Task database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;

/// Task database model.
/// One row per distinct source playlist, keyed by the URL fingerprint.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskDbModel {
    /// Fingerprint of `original_url`
    pub id: String,
    pub original_url: String,
    /// Number of segment references seen when the playlist was rewritten
    pub total_segments: i64,
    /// Unix epoch milliseconds
    pub created_at: i64,
    /// Status: downloading, completed, stopped
    pub status: String,
    /// Last rewritten playlist body. Not selected by list queries.
    #[sqlx(default)]
    #[serde(skip)]
    pub proxied_content: Option<String>,
}

impl TaskDbModel {
    pub fn new(
        id: impl Into<String>,
        original_url: impl Into<String>,
        total_segments: usize,
        proxied_content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            original_url: original_url.into(),
            total_segments: total_segments as i64,
            created_at: now_ms(),
            status: TaskStatus::Downloading.as_str().to_string(),
            proxied_content: Some(proxied_content.into()),
        }
    }

    /// Parsed status. Unknown values are treated as stopped.
    pub fn status(&self) -> TaskStatus {
        TaskStatus::parse(&self.status).unwrap_or(TaskStatus::Stopped)
    }
}

/// Task status values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Fetches were dispatched and not all segments are cached yet.
    Downloading,
    /// Every declared segment is cached.
    Completed,
    /// Explicitly stopped by an operator.
    Stopped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "downloading" => Some(Self::Downloading),
            "completed" => Some(Self::Completed),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    /// Allowed lifecycle edges.
    ///
    /// `stopped -> downloading` only happens through a deliberate API add.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Downloading, Self::Completed)
                | (Self::Downloading, Self::Stopped)
                | (Self::Completed, Self::Stopped)
                | (Self::Stopped, Self::Downloading)
        )
    }
}

/// Task item database model.
/// One row per file dispatched to the fetch engine.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskItemDbModel {
    pub id: i64,
    pub task_id: String,
    pub filename: String,
    /// Handle returned by the fetch engine
    pub job_handle: String,
    /// Resolved source URL
    pub url: String,
    /// segment, key or init
    pub kind: String,
    pub created_at: i64,
}

/// Insert payload for a task item; the row id is assigned by SQLite.
#[derive(Debug, Clone)]
pub struct NewTaskItem {
    pub task_id: String,
    pub filename: String,
    pub job_handle: String,
    pub url: String,
    pub kind: String,
}
