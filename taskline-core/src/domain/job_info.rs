//! Job audit records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::JobType;
use crate::domain::status::Status;

/// One row per finished job, kept for reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub job_type: JobType,
    pub job_name: String,
    pub workflow_name: String,
    #[serde(default)]
    pub workflow_display_name: String,
    pub task_id: i64,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub service_module: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_secs: i64,
    pub status: Status,
}
