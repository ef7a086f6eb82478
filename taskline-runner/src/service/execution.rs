//! Execution service
//!
//! Runs a dispatched job's steps in order and decides the job outcome:
//! - Cancellation is observed between steps
//! - The first failing step ends the job unless its spec ignores errors
//! - The whole step loop is bounded by the job timeout
//! - Declared outputs are read back whatever the outcome
//!
//! Progress goes to a `JobReporter`, which the poller backs with the
//! orchestrator's dispatch API.

use async_trait::async_trait;
use chrono::Utc;
use taskline_core::domain::status::{Status, StepStatus};
use taskline_core::domain::step::StepTask;
use taskline_core::dto::dispatch::{DispatchCompletion, DispatchedJob, StepUpdate};
use tracing::{debug, info, warn};

use crate::context::JobContext;
use crate::step::executor_for;

/// Where step progress and cancellation state come from
#[async_trait]
pub trait JobReporter: Send + Sync {
    async fn report_step(&self, update: StepUpdate);

    async fn is_cancelled(&self) -> bool;
}

#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Runs the job's steps and returns the completion to report
    async fn execute_job(
        &self,
        job: &DispatchedJob,
        ctx: &JobContext,
        reporter: &dyn JobReporter,
    ) -> DispatchCompletion;
}

#[derive(Debug, Default)]
pub struct StandardExecutionService;

impl StandardExecutionService {
    pub fn new() -> Self {
        Self
    }
}

/// How the step loop ended, before timeout handling
struct LoopOutcome {
    status: Status,
    error: Option<String>,
}

impl LoopOutcome {
    fn passed() -> Self {
        Self {
            status: Status::Passed,
            error: None,
        }
    }
}

async fn run_steps(
    steps: &mut [StepTask],
    current: &mut Option<usize>,
    ctx: &JobContext,
    reporter: &dyn JobReporter,
) -> LoopOutcome {
    for index in 0..steps.len() {
        if reporter.is_cancelled().await {
            ctx.log_info("Job cancelled");
            return LoopOutcome {
                status: Status::Cancelled,
                error: Some("job cancelled".to_string()),
            };
        }

        *current = Some(index);
        let step = &mut steps[index];
        step.status = StepStatus::Running;
        step.start_time = Some(Utc::now());
        reporter.report_step(StepUpdate::from_step(step)).await;
        ctx.step_info(&step.name, format!("Step {} started", step.name));
        debug!(step = %step.name, step_type = ?step.step_type(), "running step");

        let result = executor_for(&step.spec).run(step, ctx).await;
        step.end_time = Some(Utc::now());

        let failure = match result {
            Ok(()) => None,
            Err(e) if step.spec.ignore_err() => {
                ctx.step_warn(&step.name, format!("Step failed, error ignored: {}", e));
                None
            }
            Err(e) => Some(e.to_string()),
        };

        match failure {
            None => {
                step.status = StepStatus::Passed;
                ctx.step_info(&step.name, format!("Step {} passed", step.name));
                reporter.report_step(StepUpdate::from_step(step)).await;
            }
            Some(error) => {
                step.status = StepStatus::Failed;
                step.error = Some(error.clone());
                ctx.step_error(&step.name, format!("Step {} failed: {}", step.name, error));
                reporter.report_step(StepUpdate::from_step(step)).await;
                *current = None;
                return LoopOutcome {
                    status: Status::Failed,
                    error: Some(format!("step {} failed: {}", step.name, error)),
                };
            }
        }
        *current = None;
    }
    LoopOutcome::passed()
}

#[async_trait]
impl ExecutionService for StandardExecutionService {
    async fn execute_job(
        &self,
        job: &DispatchedJob,
        ctx: &JobContext,
        reporter: &dyn JobReporter,
    ) -> DispatchCompletion {
        info!(
            "Executing job {} ({} steps) of {}#{}",
            job.job_name,
            job.steps.len(),
            job.workflow_name,
            job.task_id
        );
        ctx.log_info(format!("Job {} started", job.job_name));

        let mut steps = job.steps.clone();
        let mut current = None;
        let timeout = job.timeout_duration();

        let finished =
            tokio::time::timeout(timeout, run_steps(&mut steps, &mut current, ctx, reporter)).await;
        let outcome = match finished {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Job {} timed out after {:?}", job.job_name, timeout);
                if let Some(step) = current.and_then(|index| steps.get_mut(index)) {
                    step.status = StepStatus::Timeout;
                    step.end_time = Some(Utc::now());
                    step.error = Some("timeout".to_string());
                    reporter.report_step(StepUpdate::from_step(step)).await;
                }
                ctx.log_error(format!("Job timed out after {} minutes", timeout.as_secs() / 60));
                LoopOutcome {
                    status: Status::Timeout,
                    error: Some(format!("job timed out after {} minutes", timeout.as_secs() / 60)),
                }
            }
        };

        let outputs = ctx.read_outputs(&job.outputs).await;
        ctx.log_info(format!("Job {} finished: {}", job.job_name, outcome.status));
        info!("Job {} finished with status {}", job.job_name, outcome.status);

        DispatchCompletion {
            status: outcome.status,
            error: outcome.error,
            outputs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::{dispatched_job, test_context};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};
    use taskline_core::domain::common::Output;
    use taskline_core::domain::step::{StepDebugSpec, StepScriptSpec, StepSpec, StepTarArchiveSpec};

    /// Records updates; reports cancellation once `cancel_after` checks passed
    #[derive(Default)]
    struct RecordingReporter {
        updates: Mutex<Vec<StepUpdate>>,
        checks: AtomicUsize,
        cancel_after: Option<usize>,
    }

    impl RecordingReporter {
        fn cancelling_after(checks: usize) -> Self {
            Self {
                cancel_after: Some(checks),
                ..Default::default()
            }
        }

        fn last_status(&self, step: &str) -> Option<StepStatus> {
            self.updates
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .rev()
                .find(|u| u.name == step)
                .map(|u| u.status)
        }
    }

    #[async_trait]
    impl JobReporter for RecordingReporter {
        async fn report_step(&self, update: StepUpdate) {
            self.updates
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(update);
        }

        async fn is_cancelled(&self) -> bool {
            let seen = self.checks.fetch_add(1, Ordering::SeqCst);
            self.cancel_after.is_some_and(|after| seen >= after)
        }
    }

    fn shell(name: &str, script: &str) -> StepTask {
        StepTask::new(
            name,
            StepSpec::Shell(StepScriptSpec {
                script: script.to_string(),
                skip_prepare: false,
            }),
        )
    }

    async fn execute(
        steps: Vec<StepTask>,
        outputs: Vec<Output>,
        reporter: &RecordingReporter,
    ) -> DispatchCompletion {
        let dir = tempfile::tempdir().unwrap();
        let mut job = dispatched_job(Vec::new());
        job.steps = steps;
        job.outputs = outputs;
        let (ctx, _) = test_context(dir.path(), &job).await;
        StandardExecutionService::new()
            .execute_job(&job, &ctx, reporter)
            .await
    }

    #[tokio::test]
    async fn test_all_steps_pass_and_outputs_are_read() {
        let reporter = RecordingReporter::default();
        let completion = execute(
            vec![
                shell("compile", "echo compiled"),
                shell("publish", "echo reg/api:1 > \"$TASKLINE_OUTPUTS_DIR/IMAGE\""),
            ],
            vec![Output::named("IMAGE")],
            &reporter,
        )
        .await;

        assert_eq!(completion.status, Status::Passed);
        assert_eq!(completion.outputs["IMAGE"], "reg/api:1");
        assert_eq!(reporter.last_status("publish"), Some(StepStatus::Passed));
    }

    #[tokio::test]
    async fn test_failing_step_stops_the_rest_but_outputs_are_kept() {
        let reporter = RecordingReporter::default();
        let completion = execute(
            vec![
                shell("version", "echo 1.2.0 > \"$TASKLINE_OUTPUTS_DIR/VERSION\""),
                shell("test", "exit 4"),
                shell("never", "echo unreachable"),
            ],
            vec![Output::named("VERSION")],
            &reporter,
        )
        .await;

        assert_eq!(completion.status, Status::Failed);
        assert!(completion.error.unwrap().contains("step test failed"));
        assert_eq!(completion.outputs["VERSION"], "1.2.0");
        assert_eq!(reporter.last_status("test"), Some(StepStatus::Failed));
        assert_eq!(reporter.last_status("never"), None);
    }

    #[tokio::test]
    async fn test_ignored_failure_passes() {
        let reporter = RecordingReporter::default();
        let cache = StepTask::new(
            "cache",
            StepSpec::TarArchive(StepTarArchiveSpec {
                result_dirs: vec!["no-such-dir".to_string()],
                file_name: "cache.tar.gz".to_string(),
                ignore_err: true,
                ..Default::default()
            }),
        );
        let completion = execute(vec![cache, shell("after", "true")], Vec::new(), &reporter).await;

        assert_eq!(completion.status, Status::Passed);
        assert_eq!(reporter.last_status("cache"), Some(StepStatus::Passed));
        assert_eq!(reporter.last_status("after"), Some(StepStatus::Passed));
    }

    #[tokio::test]
    async fn test_cancellation_observed_between_steps() {
        let reporter = RecordingReporter::cancelling_after(1);
        let completion = execute(
            vec![shell("first", "true"), shell("second", "true")],
            Vec::new(),
            &reporter,
        )
        .await;

        assert_eq!(completion.status, Status::Cancelled);
        assert_eq!(reporter.last_status("first"), Some(StepStatus::Passed));
        assert_eq!(reporter.last_status("second"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_marks_running_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = dispatched_job(Vec::new());
        job.timeout = 1;
        job.steps = vec![StepTask::new(
            "hold",
            StepSpec::DebugBefore(StepDebugSpec { breakpoint: true }),
        )];
        let (ctx, _) = test_context(dir.path(), &job).await;
        let reporter = RecordingReporter::default();

        let completion = StandardExecutionService::new()
            .execute_job(&job, &ctx, &reporter)
            .await;

        assert_eq!(completion.status, Status::Timeout);
        assert_eq!(reporter.last_status("hold"), Some(StepStatus::Timeout));
    }
}
