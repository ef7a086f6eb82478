use async_trait::async_trait;
use taskline_core::domain::step::{StepTask, StepToolInstallSpec};

use super::{StepError, StepExecutor};
use crate::context::JobContext;
use crate::process::sh;

/// Runs each tool's install script with `VERSION` set
pub struct ToolInstallExecutor {
    spec: StepToolInstallSpec,
}

impl ToolInstallExecutor {
    pub fn new(spec: StepToolInstallSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl StepExecutor for ToolInstallExecutor {
    async fn run(&self, step: &StepTask, ctx: &JobContext) -> Result<(), StepError> {
        for tool in &self.spec.installs {
            if tool.install_script.trim().is_empty() {
                return Err(StepError::invalid(format!(
                    "tool {} {} has no install script",
                    tool.name, tool.version
                )));
            }
            ctx.step_info(&step.name, format!("Installing {} {}", tool.name, tool.version));
            sh(tool.install_script.clone())
                .env("VERSION", tool.version.clone())
                .run(ctx, &step.name)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::{dispatched_job, test_context};
    use taskline_core::domain::step::{StepSpec, Tool};

    #[tokio::test]
    async fn test_install_script_sees_version() {
        let dir = tempfile::tempdir().unwrap();
        let job = dispatched_job(Vec::new());
        let (ctx, _) = test_context(dir.path(), &job).await;
        let spec = StepToolInstallSpec {
            installs: vec![Tool {
                name: "go".to_string(),
                version: "1.22".to_string(),
                install_script: "echo $VERSION > \"$WORKSPACE/go.version\"".to_string(),
            }],
        };
        let step = StepTask::new("tools", StepSpec::Tools(spec.clone()));

        ToolInstallExecutor::new(spec).run(&step, &ctx).await.unwrap();

        let version = std::fs::read_to_string(ctx.workspace.join("go.version")).unwrap();
        assert_eq!(version.trim(), "1.22");
    }

    #[tokio::test]
    async fn test_missing_install_script_fails() {
        let dir = tempfile::tempdir().unwrap();
        let job = dispatched_job(Vec::new());
        let (ctx, _) = test_context(dir.path(), &job).await;
        let spec = StepToolInstallSpec {
            installs: vec![Tool {
                name: "node".to_string(),
                ..Default::default()
            }],
        };
        let step = StepTask::new("tools", StepSpec::Tools(spec.clone()));

        let err = ToolInstallExecutor::new(spec).run(&step, &ctx).await.unwrap_err();
        assert!(matches!(err, StepError::Invalid(_)));
    }
}
