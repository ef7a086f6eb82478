//! Workflow task types
//!
//! A `WorkflowTask` is one execution of a workflow definition. The
//! orchestrator owns the orchestration fields (statuses, timestamps, the
//! global context) and the runner fills in the execution results of the
//! job it was dispatched.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::catalog::DbType;
use crate::domain::common::{Infrastructure, Output};
use crate::domain::job::{DeployModule, JobProperties, JobType};
use crate::domain::status::Status;
use crate::domain::step::StepTask;
use crate::domain::workflow::{ApprovalGate, ErrorPolicy, NotifyCtl, WorkflowDefinition, stage_concurrency};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub workflow_name: String,
    #[serde(default)]
    pub workflow_display_name: String,
    #[serde(default)]
    pub project: String,
    pub task_id: i64,
    pub status: Status,
    pub stages: Vec<StageTask>,
    #[serde(default)]
    pub global_context: BTreeMap<String, String>,
    #[serde(default)]
    pub creator: String,
    /// The definition the task was compiled from, after trigger args were merged
    #[serde(default)]
    pub origin_args: Option<WorkflowDefinition>,
    #[serde(default)]
    pub approval: Option<ApprovalGate>,
    #[serde(default)]
    pub notify_ctls: Vec<NotifyCtl>,
    #[serde(default)]
    pub error: Option<String>,
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl WorkflowTask {
    pub fn jobs(&self) -> impl Iterator<Item = &JobTask> {
        self.stages.iter().flat_map(|stage| stage.jobs.iter())
    }

    pub fn find_job(&self, name: &str) -> Option<&JobTask> {
        self.jobs().find(|job| job.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTask {
    pub name: String,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub concurrency: Option<usize>,
    pub status: Status,
    pub jobs: Vec<JobTask>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl StageTask {
    pub fn effective_concurrency(&self) -> usize {
        stage_concurrency(self.parallel, self.concurrency, self.jobs.len())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTask {
    pub name: String,
    /// Unique within the task, used as the output namespace
    pub key: String,
    #[serde(default)]
    pub display_name: String,
    /// Name of the definition job this task was compiled from
    #[serde(default)]
    pub origin_name: String,
    pub job_type: JobType,
    #[serde(default)]
    pub job_info: BTreeMap<String, String>,
    pub status: Status,
    #[serde(flatten)]
    pub spec: JobTaskSpec,
    #[serde(default)]
    pub outputs: Vec<Output>,
    /// Minutes
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub error_policy: ErrorPolicy,
    #[serde(default)]
    pub infrastructure: Infrastructure,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobTask {
    pub fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        job_type: JobType,
        spec: JobTaskSpec,
    ) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            display_name: String::new(),
            origin_name: String::new(),
            job_type,
            job_info: BTreeMap::new(),
            status: Status::Created,
            spec,
            outputs: Vec::new(),
            timeout: 0,
            error_policy: ErrorPolicy::Stop,
            infrastructure: Infrastructure::Kubernetes,
            start_time: None,
            end_time: None,
            error: None,
        }
    }

    pub fn steps(&self) -> &[StepTask] {
        match &self.spec {
            JobTaskSpec::Freestyle(spec) => &spec.steps,
            _ => &[],
        }
    }

    pub fn steps_mut(&mut self) -> Option<&mut Vec<StepTask>> {
        match &mut self.spec {
            JobTaskSpec::Freestyle(spec) => Some(&mut spec.steps),
            _ => None,
        }
    }

    /// Marks the job as finished with the given status
    pub fn finish(&mut self, status: Status, error: Option<String>) {
        self.status = status;
        if error.is_some() {
            self.error = error;
        }
        self.end_time = Some(Utc::now());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "task_spec", rename_all = "snake_case")]
pub enum JobTaskSpec {
    Freestyle(JobTaskFreestyleSpec),
    Sql(JobTaskSqlSpec),
    Deploy(JobTaskDeploySpec),
    Approval(JobTaskApprovalSpec),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobTaskFreestyleSpec {
    pub properties: JobProperties,
    pub steps: Vec<StepTask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTaskSqlSpec {
    pub db_instance_id: String,
    pub db_type: DbType,
    pub sql: String,
    #[serde(default)]
    pub results: Vec<SqlExecResult>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlExecStatus {
    #[default]
    NotExec,
    Success,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlExecResult {
    pub sql: String,
    #[serde(default)]
    pub elapsed_time_ms: i64,
    #[serde(default)]
    pub rows_affected: u64,
    #[serde(default)]
    pub status: SqlExecStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobTaskDeploySpec {
    pub env: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub production: bool,
    pub service_name: String,
    pub modules: Vec<DeployModule>,
    #[serde(default)]
    pub skip_check_run_status: bool,
    /// Images the deploy ended up rolling out, per module
    #[serde(default)]
    pub replace_images: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobTaskApprovalSpec {
    #[serde(default)]
    pub approvers: Vec<String>,
    #[serde(default)]
    pub needed_approvers: usize,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub votes: Vec<ApprovalVote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalVote {
    pub user: String,
    pub approve: bool,
    #[serde(default)]
    pub comment: String,
    pub time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_task_spec_serializes_with_kind() {
        let job = JobTask::new(
            "approve",
            "approve",
            JobType::Approval,
            JobTaskSpec::Approval(JobTaskApprovalSpec::default()),
        );
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["kind"], "approval");
        assert_eq!(json["job_type"], "approval");
        assert_eq!(json["status"], "created");

        let back: JobTask = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn test_steps_empty_for_non_freestyle() {
        let job = JobTask::new(
            "approve",
            "approve",
            JobType::Approval,
            JobTaskSpec::Approval(JobTaskApprovalSpec::default()),
        );
        assert!(job.steps().is_empty());
    }

    #[test]
    fn test_finish_keeps_earlier_error() {
        let mut job = JobTask::new(
            "build",
            "build.svc.mod",
            JobType::Build,
            JobTaskSpec::Freestyle(JobTaskFreestyleSpec::default()),
        );
        job.error = Some("step failed".to_string());
        job.finish(Status::Failed, None);
        assert_eq!(job.error.as_deref(), Some("step failed"));
        assert!(job.end_time.is_some());
    }
}
