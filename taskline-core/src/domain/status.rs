//! Execution status types

use serde::{Deserialize, Serialize};

/// Status of a workflow task, stage or job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Created,
    Prepare,
    Running,
    WaitingApprove,
    ManualCheck,
    Passed,
    Failed,
    Timeout,
    Cancelled,
    Rejected,
    Skipped,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Passed
                | Status::Failed
                | Status::Timeout
                | Status::Cancelled
                | Status::Rejected
                | Status::Skipped
        )
    }

    /// Terminal outcomes that count against the error policy
    pub fn is_failure(&self) -> bool {
        matches!(self, Status::Failed | Status::Timeout | Status::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Created => "created",
            Status::Prepare => "prepare",
            Status::Running => "running",
            Status::WaitingApprove => "waiting_approve",
            Status::ManualCheck => "manual_check",
            Status::Passed => "passed",
            Status::Failed => "failed",
            Status::Timeout => "timeout",
            Status::Cancelled => "cancelled",
            Status::Rejected => "rejected",
            Status::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "created" => Status::Created,
            "prepare" => Status::Prepare,
            "running" => Status::Running,
            "waiting_approve" => Status::WaitingApprove,
            "manual_check" => Status::ManualCheck,
            "passed" => Status::Passed,
            "failed" => Status::Failed,
            "timeout" => Status::Timeout,
            "cancelled" => Status::Cancelled,
            "rejected" => Status::Rejected,
            "skipped" => Status::Skipped,
            other => return Err(format!("unknown status: {}", other)),
        };
        Ok(status)
    }
}

/// Status of a single step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    NotRun,
    Running,
    Passed,
    Failed,
    Timeout,
    Cancelled,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Passed | StepStatus::Failed | StepStatus::Timeout | StepStatus::Cancelled
        )
    }
}

impl From<StepStatus> for Status {
    fn from(status: StepStatus) -> Self {
        match status {
            StepStatus::NotRun => Status::Created,
            StepStatus::Running => Status::Running,
            StepStatus::Passed => Status::Passed,
            StepStatus::Failed => Status::Failed,
            StepStatus::Timeout => Status::Timeout,
            StepStatus::Cancelled => Status::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [Status::WaitingApprove, Status::ManualCheck, Status::Skipped] {
            assert_eq!(status.as_str().parse::<Status>(), Ok(status));
        }
    }

    #[test]
    fn test_failure_statuses() {
        assert!(Status::Timeout.is_failure());
        assert!(Status::Rejected.is_failure());
        assert!(!Status::Cancelled.is_failure());
        assert!(Status::Cancelled.is_terminal());
        assert!(!Status::WaitingApprove.is_terminal());
    }
}
