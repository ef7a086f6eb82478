use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use taskline_core::domain::step::{StepDebugSpec, StepTask};

use super::{StepError, StepExecutor};
use crate::context::JobContext;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hook {
    Before,
    After,
}

/// Marker file that holds a job at a breakpoint while it exists
pub fn breakpoint_path(ctx: &JobContext, before: bool) -> PathBuf {
    ctx.scratch_path(if before { "debug-before" } else { "debug-after" })
}

/// Pauses the job around its build steps until the marker file is removed
///
/// The wait is bounded by the job timeout.
pub struct DebugExecutor {
    spec: StepDebugSpec,
    hook: Hook,
}

impl DebugExecutor {
    pub fn before(spec: StepDebugSpec) -> Self {
        Self {
            spec,
            hook: Hook::Before,
        }
    }

    pub fn after(spec: StepDebugSpec) -> Self {
        Self {
            spec,
            hook: Hook::After,
        }
    }
}

#[async_trait]
impl StepExecutor for DebugExecutor {
    async fn run(&self, step: &StepTask, ctx: &JobContext) -> Result<(), StepError> {
        if !self.spec.breakpoint {
            return Ok(());
        }
        let marker = breakpoint_path(ctx, self.hook == Hook::Before);
        tokio::fs::write(&marker, ctx.dispatch_id.to_string()).await?;
        ctx.step_info(
            &step.name,
            format!("Breakpoint reached, remove {} to continue", marker.display()),
        );

        while tokio::fs::try_exists(&marker).await? {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        ctx.step_info(&step.name, "Breakpoint released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::{dispatched_job, test_context};
    use crate::service::LogBufferService;
    use taskline_core::domain::step::StepSpec;

    #[tokio::test]
    async fn test_without_breakpoint_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let job = dispatched_job(Vec::new());
        let (ctx, logs) = test_context(dir.path(), &job).await;
        let step = StepTask::new("debug", StepSpec::DebugBefore(StepDebugSpec::default()));

        DebugExecutor::before(StepDebugSpec::default()).run(&step, &ctx).await.unwrap();

        assert!(logs.drain().is_empty());
        assert!(!breakpoint_path(&ctx, true).exists());
    }

    #[tokio::test]
    async fn test_breakpoint_waits_for_marker_removal() {
        let dir = tempfile::tempdir().unwrap();
        let job = dispatched_job(Vec::new());
        let (ctx, _) = test_context(dir.path(), &job).await;
        let spec = StepDebugSpec { breakpoint: true };
        let step = StepTask::new("debug", StepSpec::DebugAfter(spec.clone()));
        let marker = breakpoint_path(&ctx, false);

        let release = async {
            while !marker.exists() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            std::fs::remove_file(&marker).unwrap();
        };
        let executor = DebugExecutor::after(spec);
        let (result, _) = tokio::join!(executor.run(&step, &ctx), release);

        assert!(result.is_ok());
    }
}
