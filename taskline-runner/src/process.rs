//! Child processes spawned by steps
//!
//! Every line a process prints on stdout or stderr becomes a job log entry
//! for the step that started it. Processes inherit the job envs and are
//! killed when the step future is dropped (job timeout).

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::context::JobContext;
use crate::step::StepError;

/// A command line to run for a step
#[derive(Debug, Clone)]
pub struct Process {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    envs: Vec<(String, String)>,
    stdin: Option<String>,
}

impl Process {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Extra env on top of the job envs
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Written to the child's stdin, then stdin is closed
    pub fn stdin(mut self, data: impl Into<String>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Runs to completion, streaming output into the step log
    pub async fn run(self, ctx: &JobContext, step: &str) -> Result<(), StepError> {
        let command_line = ctx.mask(&self.command_line());
        debug!(step = %step, cmd = %command_line, "starting step process");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(ctx.envs().iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(self.cwd.as_ref().unwrap_or(&ctx.workspace))
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| StepError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if let (Some(data), Some(mut stdin)) = (self.stdin, child.stdin.take()) {
            stdin.write_all(data.as_bytes()).await?;
            drop(stdin);
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        tokio::join!(
            forward_lines(stdout, ctx, step),
            forward_lines(stderr, ctx, step)
        );

        let status = child.wait().await?;
        let code = status.code().unwrap_or(-1);
        info!(step = %step, exit_code = code, success = status.success(), "step process exited");

        if status.success() {
            Ok(())
        } else {
            Err(StepError::Exit {
                command: command_line,
                code,
            })
        }
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: Option<R>, ctx: &JobContext, step: &str) {
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        ctx.step_info(step, line);
    }
}

/// Shell process running `script` through `sh -c`
pub fn sh(script: impl Into<String>) -> Process {
    Process::new("sh").arg("-c").arg(script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::{dispatched_job, test_context};
    use crate::service::LogBufferService;
    use taskline_core::domain::common::KeyVal;

    #[tokio::test]
    async fn test_output_lines_become_step_logs() {
        let dir = tempfile::tempdir().unwrap();
        let job = dispatched_job(vec![KeyVal::new("GREETING", "hello")]);
        let (ctx, logs) = test_context(dir.path(), &job).await;

        sh("echo $GREETING; echo oops >&2").run(&ctx, "greet").await.unwrap();

        let messages: Vec<String> = logs.drain().into_iter().map(|e| e.message).collect();
        assert!(messages.contains(&"hello".to_string()));
        assert!(messages.contains(&"oops".to_string()));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let job = dispatched_job(Vec::new());
        let (ctx, _) = test_context(dir.path(), &job).await;

        let err = sh("exit 3").run(&ctx, "fail").await.unwrap_err();
        assert!(matches!(err, StepError::Exit { code: 3, .. }));
    }

    #[tokio::test]
    async fn test_stdin_is_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let job = dispatched_job(Vec::new());
        let (ctx, logs) = test_context(dir.path(), &job).await;

        Process::new("cat").stdin("from stdin").run(&ctx, "cat").await.unwrap();

        assert_eq!(logs.drain()[0].message, "from stdin");
    }
}
