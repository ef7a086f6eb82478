//! Workflow task DTOs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::status::Status;
use crate::domain::task::WorkflowTask;
use crate::domain::workflow::WorkflowDefinition;

/// Request to trigger a workflow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTask {
    /// Trigger-time overrides, merged onto the stored definition by job name
    #[serde(default)]
    pub args: Option<WorkflowDefinition>,
    #[serde(default)]
    pub creator: Option<String>,
    /// Exposed to jobs as `{{.workflow.input.NAME}}`
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub workflow_name: String,
    pub task_id: i64,
}

/// Lightweight listing row for a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub workflow_name: String,
    pub task_id: i64,
    pub status: Status,
    pub creator: String,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl From<&WorkflowTask> for TaskSummary {
    fn from(task: &WorkflowTask) -> Self {
        TaskSummary {
            workflow_name: task.workflow_name.clone(),
            task_id: task.task_id,
            status: task.status,
            creator: task.creator.clone(),
            create_time: task.create_time,
            start_time: task.start_time,
            end_time: task.end_time,
        }
    }
}

/// Approve or reject a gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub user: String,
    pub approve: bool,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualDecision {
    Continue,
    Abort,
}

/// Resolve a job paused by the manual-check error policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub user: String,
    pub decision: ManualDecision,
}
