//! Approval jobs

use taskline_core::domain::job::{ApprovalJobSpec, JobType};
use taskline_core::domain::task::{JobTask, JobTaskApprovalSpec, JobTaskSpec};

use super::CompileCtx;

pub(crate) fn to_job(ctx: &CompileCtx<'_>, spec: &ApprovalJobSpec) -> JobTask {
    let mut task = JobTask::new(
        ctx.job_name,
        ctx.job_name,
        JobType::Approval,
        JobTaskSpec::Approval(JobTaskApprovalSpec {
            approvers: spec.approvers.clone(),
            needed_approvers: spec.needed_approvers.max(1),
            description: spec.description.clone(),
            votes: Vec::new(),
        }),
    );
    task.timeout = spec.timeout;
    task
}
