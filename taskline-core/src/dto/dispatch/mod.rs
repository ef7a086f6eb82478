//! Dispatch DTOs
//!
//! Traffic between the orchestrator's runner queue and remote executors:
//! claiming a job task, reporting step progress and completion, and
//! polling for cancellation.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::common::{Infrastructure, Output};
use crate::domain::job::JobProperties;
use crate::domain::status::{Status, StepStatus};
use crate::domain::step::StepTask;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub runner_id: String,
    pub infrastructures: Vec<Infrastructure>,
}

/// A job task handed to a runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchedJob {
    pub dispatch_id: Uuid,
    pub workflow_name: String,
    pub task_id: i64,
    pub job_name: String,
    pub job_key: String,
    pub infrastructure: Infrastructure,
    /// Minutes
    pub timeout: u64,
    pub properties: JobProperties,
    pub steps: Vec<StepTask>,
    #[serde(default)]
    pub outputs: Vec<Output>,
}

impl DispatchedJob {
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1) * 60)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepUpdate {
    pub name: String,
    pub status: StepStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl StepUpdate {
    pub fn from_step(step: &StepTask) -> Self {
        Self {
            name: step.name.clone(),
            status: step.status,
            error: step.error.clone(),
            start_time: step.start_time,
            end_time: step.end_time,
        }
    }

    pub fn apply_to(&self, step: &mut StepTask) {
        step.status = self.status;
        step.error = self.error.clone();
        if self.start_time.is_some() {
            step.start_time = self.start_time;
        }
        if self.end_time.is_some() {
            step.end_time = self.end_time;
        }
    }
}

/// Final report of a dispatched job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchCompletion {
    pub status: Status,
    #[serde(default)]
    pub error: Option<String>,
    /// Output values by name, published even when the job failed
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CancelState {
    pub cancelled: bool,
}
