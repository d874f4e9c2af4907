//! API request and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::time::ms_to_datetime;
use crate::task::TaskProgress;

/// One task as shown in the admin list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub id: String,
    pub original_url: String,
    pub total_segments: i64,
    pub downloaded_segments: i64,
    pub created_time: DateTime<Utc>,
    pub status: String,
}

impl From<TaskProgress> for TaskResponse {
    fn from(progress: TaskProgress) -> Self {
        let task = progress.task;
        Self {
            created_time: ms_to_datetime(task.created_at),
            id: task.id,
            original_url: task.original_url,
            total_segments: task.total_segments,
            downloaded_segments: progress.downloaded_segments,
            status: task.status,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddTaskRequest {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTaskResponse {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub components: Vec<ComponentHealth>,
}

/// Component health status.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: String,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}

#[derive(Debug, Serialize)]
pub struct LoggingConfigResponse {
    pub filter: String,
    pub available_modules: Vec<ModuleInfo>,
}

/// A log target that can appear in a filter directive.
#[derive(Debug, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::TaskDbModel;

    #[test]
    fn test_task_response_fields() {
        let task = TaskDbModel::new("abc", "http://origin/v.m3u8", 10, "#EXTM3U");
        let response = TaskResponse::from(TaskProgress {
            task,
            downloaded_segments: 4,
        });

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["original_url"], "http://origin/v.m3u8");
        assert_eq!(json["total_segments"], 10);
        assert_eq!(json["downloaded_segments"], 4);
        assert_eq!(json["status"], "downloading");
        assert!(json["created_time"].is_string());
        assert!(json.get("proxied_content").is_none());
    }
}
