use async_trait::async_trait;
use taskline_core::domain::step::{StepScriptSpec, StepTask};

use super::{StepError, StepExecutor};
use crate::context::JobContext;
use crate::process::Process;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interpreter {
    Shell,
    BatchFile,
    PowerShell,
}

impl Interpreter {
    fn extension(self) -> &'static str {
        match self {
            Interpreter::Shell => "sh",
            Interpreter::BatchFile => "bat",
            Interpreter::PowerShell => "ps1",
        }
    }

    /// Lines placed before the user script unless `skip_prepare` is set
    fn preamble(self) -> &'static str {
        match self {
            Interpreter::Shell => "set -e\ncd \"$WORKSPACE\"\n",
            Interpreter::BatchFile => "@echo off\r\ncd /d \"%WORKSPACE%\"\r\n",
            Interpreter::PowerShell => "$ErrorActionPreference = 'Stop'\nSet-Location $env:WORKSPACE\n",
        }
    }

    fn process(self, file: &str) -> Process {
        match self {
            Interpreter::Shell => Process::new("bash").arg(file),
            Interpreter::BatchFile => Process::new("cmd").args(["/C", file]),
            Interpreter::PowerShell => {
                Process::new("pwsh").args(["-NoProfile", "-NonInteractive", "-File", file])
            }
        }
    }
}

/// Writes the script to the job's scripts directory and runs it
pub struct ScriptExecutor {
    spec: StepScriptSpec,
    interpreter: Interpreter,
}

impl ScriptExecutor {
    pub fn shell(spec: StepScriptSpec) -> Self {
        Self {
            spec,
            interpreter: Interpreter::Shell,
        }
    }

    pub fn batch_file(spec: StepScriptSpec) -> Self {
        Self {
            spec,
            interpreter: Interpreter::BatchFile,
        }
    }

    pub fn power_shell(spec: StepScriptSpec) -> Self {
        Self {
            spec,
            interpreter: Interpreter::PowerShell,
        }
    }

    fn content(&self) -> String {
        if self.spec.skip_prepare {
            self.spec.script.clone()
        } else {
            format!("{}{}", self.interpreter.preamble(), self.spec.script)
        }
    }
}

#[async_trait]
impl StepExecutor for ScriptExecutor {
    async fn run(&self, step: &StepTask, ctx: &JobContext) -> Result<(), StepError> {
        let path = ctx.script_path(&step.name, self.interpreter.extension());
        tokio::fs::write(&path, self.content()).await?;

        self.interpreter
            .process(&path.to_string_lossy())
            .run(ctx, &step.name)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::{dispatched_job, test_context};
    use taskline_core::domain::step::StepSpec;

    fn shell_step(script: &str) -> (StepTask, ScriptExecutor) {
        let spec = StepScriptSpec {
            script: script.to_string(),
            skip_prepare: false,
        };
        (
            StepTask::new("build-shell", StepSpec::Shell(spec.clone())),
            ScriptExecutor::shell(spec),
        )
    }

    #[test]
    fn test_skip_prepare_omits_preamble() {
        let executor = ScriptExecutor::shell(StepScriptSpec {
            script: "make".to_string(),
            skip_prepare: true,
        });
        assert_eq!(executor.content(), "make");

        let (_, executor) = shell_step("make");
        assert!(executor.content().starts_with("set -e"));
        assert!(executor.content().ends_with("make"));
    }

    #[tokio::test]
    async fn test_shell_script_runs_in_workspace_and_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let job = dispatched_job(Vec::new());
        let (ctx, _) = test_context(dir.path(), &job).await;
        let (step, executor) = shell_step("pwd > where.txt\necho v1 > \"$TASKLINE_OUTPUTS_DIR/VERSION\"");

        executor.run(&step, &ctx).await.unwrap();

        let pwd = tokio::fs::read_to_string(ctx.workspace.join("where.txt")).await.unwrap();
        assert_eq!(
            std::fs::canonicalize(pwd.trim()).unwrap(),
            std::fs::canonicalize(&ctx.workspace).unwrap()
        );
        let version = tokio::fs::read_to_string(ctx.outputs_dir.join("VERSION")).await.unwrap();
        assert_eq!(version.trim(), "v1");
    }

    #[tokio::test]
    async fn test_preamble_stops_on_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let job = dispatched_job(Vec::new());
        let (ctx, _) = test_context(dir.path(), &job).await;
        let (step, executor) = shell_step("false\ntouch reached");

        assert!(executor.run(&step, &ctx).await.is_err());
        assert!(!ctx.workspace.join("reached").exists());
    }
}
