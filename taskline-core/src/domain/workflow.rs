//! Workflow definition types
//!
//! A `WorkflowDefinition` is the immutable template a user saves. Triggering
//! it compiles the definition into a `WorkflowTask`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cronjob::ScheduleCtrl;
use crate::domain::job::{JobSpec, JobType};
use crate::domain::status::Status;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stages: Vec<Stage>,
    /// Gate that must be approved before the first stage runs
    #[serde(default)]
    pub approval: Option<ApprovalGate>,
    #[serde(default)]
    pub notify_ctls: Vec<NotifyCtl>,
    #[serde(default)]
    pub schedules: Option<ScheduleCtrl>,
    #[serde(default)]
    pub schedule_enabled: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkflowDefinition {
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.stages.iter().flat_map(|stage| stage.jobs.iter())
    }

    pub fn jobs_mut(&mut self) -> impl Iterator<Item = &mut Job> {
        self.stages.iter_mut().flat_map(|stage| stage.jobs.iter_mut())
    }

    pub fn find_job(&self, name: &str) -> Option<&Job> {
        self.jobs().find(|job| job.name == name)
    }

    pub fn find_job_mut(&mut self, name: &str) -> Option<&mut Job> {
        self.jobs_mut().find(|job| job.name == name)
    }

    pub fn display_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    #[serde(default)]
    pub parallel: bool,
    /// Upper bound on concurrently running jobs when `parallel` is set
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

impl Stage {
    /// Number of jobs allowed to hold a slot at once
    pub fn effective_concurrency(&self, job_count: usize) -> usize {
        stage_concurrency(self.parallel, self.concurrency, job_count)
    }
}

pub(crate) fn stage_concurrency(parallel: bool, concurrency: Option<usize>, job_count: usize) -> usize {
    if !parallel {
        return 1;
    }
    concurrency.filter(|limit| *limit > 0).unwrap_or(job_count).max(1)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    #[serde(flatten)]
    pub spec: JobSpec,
    #[serde(default)]
    pub error_policy: ErrorPolicy,
}

impl Job {
    pub fn new(name: impl Into<String>, spec: JobSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            error_policy: ErrorPolicy::default(),
        }
    }

    pub fn job_type(&self) -> JobType {
        self.spec.job_type()
    }
}

/// What the scheduler does when a job ends in a failure status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop the stage; jobs not yet started are cancelled
    #[default]
    Stop,
    /// Record the failure and keep going
    Ignore,
    /// Pause until an operator decides to continue or abort
    ManualCheck,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalGate {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub approvers: Vec<String>,
    #[serde(default)]
    pub needed_approvers: usize,
    /// Minutes to wait for a decision, 0 means the default
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub description: String,
}

/// Notification settings of a workflow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyCtl {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_type: String,
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default)]
    pub notify_types: Vec<NotifyType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyType {
    Running,
    Passed,
    Failed,
    Timeout,
    Cancelled,
    Rejected,
    WaitingApprove,
    /// Fires whenever the status differs from the previous task's
    Changed,
}

impl NotifyType {
    pub fn matches(&self, status: Status) -> bool {
        matches!(
            (self, status),
            (NotifyType::Running, Status::Running)
                | (NotifyType::Passed, Status::Passed)
                | (NotifyType::Failed, Status::Failed)
                | (NotifyType::Timeout, Status::Timeout)
                | (NotifyType::Cancelled, Status::Cancelled)
                | (NotifyType::Rejected, Status::Rejected)
                | (NotifyType::WaitingApprove, Status::WaitingApprove)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::{ApprovalJobSpec, SqlJobSpec};

    fn sample() -> WorkflowDefinition {
        WorkflowDefinition {
            name: "release".to_string(),
            stages: vec![
                Stage {
                    name: "db".to_string(),
                    jobs: vec![Job::new(
                        "migrate",
                        JobSpec::Sql(SqlJobSpec {
                            db_instance_id: "db1".to_string(),
                            sql: "select 1;".to_string(),
                        }),
                    )],
                    ..Default::default()
                },
                Stage {
                    name: "gate".to_string(),
                    jobs: vec![Job::new("approve", JobSpec::Approval(ApprovalJobSpec::default()))],
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_find_job_across_stages() {
        let workflow = sample();
        assert_eq!(workflow.find_job("approve").map(Job::job_type), Some(JobType::Approval));
        assert!(workflow.find_job("missing").is_none());
        assert_eq!(workflow.display_name(), "release");
    }

    #[test]
    fn test_job_serializes_with_flattened_spec() {
        let workflow = sample();
        let json = serde_json::to_value(&workflow.stages[0].jobs[0]).unwrap();
        assert_eq!(json["type"], "sql");
        assert_eq!(json["spec"]["db_instance_id"], "db1");
        assert_eq!(json["error_policy"], "stop");

        let back: Job = serde_json::from_value(json).unwrap();
        assert_eq!(back, workflow.stages[0].jobs[0]);
    }

    #[test]
    fn test_effective_concurrency() {
        let serial = Stage::default();
        assert_eq!(serial.effective_concurrency(5), 1);

        let unbounded = Stage {
            parallel: true,
            ..Default::default()
        };
        assert_eq!(unbounded.effective_concurrency(5), 5);

        let bounded = Stage {
            parallel: true,
            concurrency: Some(2),
            ..Default::default()
        };
        assert_eq!(bounded.effective_concurrency(5), 2);
    }

    #[test]
    fn test_notify_type_matches_status() {
        assert!(NotifyType::Failed.matches(Status::Failed));
        assert!(!NotifyType::Changed.matches(Status::Failed));
    }
}
