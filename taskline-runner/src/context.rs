//! Execution context for a dispatched job
//!
//! Holds everything steps share while a job runs:
//! - The job's directory layout (workspace, outputs, scripts)
//! - The environment handed to every spawned process
//! - Credential values to mask in logs
//! - The log buffer and object store

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::{Captures, Regex};
use taskline_core::domain::common::Output;
use taskline_core::domain::log::{LogEntry, LogLevel};
use taskline_core::dto::dispatch::DispatchedJob;
use taskline_core::output::OUTPUTS_DIR_ENV;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::object_store::ObjectStore;
use crate::service::LogBufferService;

const MASK: &str = "********";

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9_]+)\}|\$([A-Za-z0-9_]+)").expect("env reference pattern is valid")
});

pub struct JobContext {
    pub dispatch_id: Uuid,
    root: PathBuf,
    pub workspace: PathBuf,
    pub outputs_dir: PathBuf,
    scripts_dir: PathBuf,
    scratch_dir: PathBuf,
    envs: Vec<(String, String)>,
    secrets: Vec<String>,
    logs: Arc<dyn LogBufferService>,
    pub object_store: Arc<dyn ObjectStore>,
    pub http: reqwest::Client,
}

impl JobContext {
    /// Lays out `<workspace_base>/<dispatch id>/{workspace,outputs,scripts,scratch}`
    ///
    /// Job envs are applied in order (custom envs last), then the runner's
    /// own `WORKSPACE` and outputs directory, which always win.
    pub fn new(
        job: &DispatchedJob,
        workspace_base: &Path,
        logs: Arc<dyn LogBufferService>,
        object_store: Arc<dyn ObjectStore>,
    ) -> Self {
        let root = workspace_base.join(job.dispatch_id.to_string());
        let workspace = root.join("workspace");
        let outputs_dir = root.join("outputs");
        let scripts_dir = root.join("scripts");
        let scratch_dir = root.join("scratch");

        let mut envs: Vec<(String, String)> = Vec::new();
        let mut secrets = Vec::new();
        for kv in job.properties.envs.iter().chain(&job.properties.custom_envs) {
            if kv.is_credential && !kv.value.is_empty() {
                secrets.push(kv.value.clone());
            }
            set_env(&mut envs, &kv.key, &kv.value);
        }
        set_env(&mut envs, "WORKSPACE", &workspace.to_string_lossy());
        set_env(&mut envs, OUTPUTS_DIR_ENV, &outputs_dir.to_string_lossy());
        set_env(&mut envs, "JOB_NAME", &job.job_name);

        Self {
            dispatch_id: job.dispatch_id,
            root,
            workspace,
            outputs_dir,
            scripts_dir,
            scratch_dir,
            envs,
            secrets,
            logs,
            object_store,
            http: reqwest::Client::new(),
        }
    }

    pub async fn prepare(&self) -> std::io::Result<()> {
        for dir in [
            &self.workspace,
            &self.outputs_dir,
            &self.scripts_dir,
            &self.scratch_dir,
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Removes the job directory; failures are only logged
    pub async fn cleanup(&self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.root).await {
            warn!("Failed to remove job directory {}: {}", self.root.display(), e);
        }
    }

    pub fn envs(&self) -> &[(String, String)] {
        &self.envs
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.envs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Marks a value as secret so it never reaches the job log
    pub fn add_secret(&mut self, value: impl Into<String>) {
        let value = value.into();
        if !value.is_empty() {
            self.secrets.push(value);
        }
    }

    pub fn mask(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), MASK))
    }

    /// Expands `$VAR` and `${VAR}` from the job envs; unknown names stay as-is
    pub fn expand(&self, text: &str) -> String {
        if !text.contains('$') {
            return text.to_string();
        }
        ENV_REFERENCE
            .replace_all(text, |caps: &Captures<'_>| {
                let name = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                self.env(name)
                    .map(str::to_string)
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Expands envs, then anchors relative paths at the workspace
    pub fn resolve(&self, path: &str) -> PathBuf {
        let expanded = self.expand(path);
        let path = Path::new(&expanded);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        }
    }

    pub fn script_path(&self, step_name: &str, extension: &str) -> PathBuf {
        let file: String = step_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.scripts_dir.join(format!("{}.{}", file, extension))
    }

    /// Job-private location outside the workspace for intermediate files
    pub fn scratch_path(&self, name: &str) -> PathBuf {
        self.scratch_dir.join(name)
    }

    // =============================================================================
    // Job log
    // =============================================================================

    fn push(&self, level: LogLevel, step: Option<&str>, message: &str) {
        let message = self.mask(message);
        let entry = match step {
            Some(step) => LogEntry::for_step(level, step, message),
            None => LogEntry::new(level, message),
        };
        self.logs.add_entry(entry);
    }

    pub fn log_info(&self, message: impl AsRef<str>) {
        self.push(LogLevel::Info, None, message.as_ref());
    }

    pub fn log_error(&self, message: impl AsRef<str>) {
        self.push(LogLevel::Error, None, message.as_ref());
    }

    pub fn step_info(&self, step: &str, message: impl AsRef<str>) {
        self.push(LogLevel::Info, Some(step), message.as_ref());
    }

    pub fn step_warn(&self, step: &str, message: impl AsRef<str>) {
        self.push(LogLevel::Warning, Some(step), message.as_ref());
    }

    pub fn step_error(&self, step: &str, message: impl AsRef<str>) {
        self.push(LogLevel::Error, Some(step), message.as_ref());
    }

    /// Reads each declared output from `<outputs dir>/<NAME>`, trimmed
    ///
    /// Outputs a script never wrote are left out.
    pub async fn read_outputs(&self, outputs: &[Output]) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        for output in outputs {
            let path = self.outputs_dir.join(&output.name);
            match tokio::fs::read_to_string(&path).await {
                Ok(value) => {
                    values.insert(output.name.clone(), value.trim().to_string());
                }
                Err(e) => debug!("Output {} not written: {}", output.name, e),
            }
        }
        values
    }
}

fn set_env(envs: &mut Vec<(String, String)>, key: &str, value: &str) {
    match envs.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value.to_string(),
        None => envs.push((key.to_string(), value.to_string())),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::object_store::LocalObjectStore;
    use crate::service::InMemoryLogBuffer;
    use taskline_core::domain::common::{Infrastructure, KeyVal};
    use taskline_core::domain::job::JobProperties;

    pub(crate) fn dispatched_job(envs: Vec<KeyVal>) -> DispatchedJob {
        DispatchedJob {
            dispatch_id: Uuid::new_v4(),
            workflow_name: "release".to_string(),
            task_id: 7,
            job_name: "build".to_string(),
            job_key: "build.api.svc".to_string(),
            infrastructure: Infrastructure::Vm,
            timeout: 1,
            properties: JobProperties {
                envs,
                ..Default::default()
            },
            steps: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// A prepared context rooted in `dir`, with its log buffer
    pub(crate) async fn test_context(dir: &Path, job: &DispatchedJob) -> (JobContext, InMemoryLogBuffer) {
        let logs = InMemoryLogBuffer::new(1000);
        let ctx = JobContext::new(
            job,
            &dir.join("jobs"),
            Arc::new(logs.clone()),
            Arc::new(LocalObjectStore::new(dir.join("objects"))),
        );
        ctx.prepare().await.unwrap();
        (ctx, logs)
    }

    #[tokio::test]
    async fn test_envs_and_paths() {
        let dir = tempfile::tempdir().unwrap();
        let job = dispatched_job(vec![
            KeyVal::new("WORKSPACE", "/workspace"),
            KeyVal::new("SERVICE", "api"),
        ]);
        let (ctx, _) = test_context(dir.path(), &job).await;

        assert_eq!(ctx.env("WORKSPACE").map(PathBuf::from), Some(ctx.workspace.clone()));
        assert_eq!(ctx.expand("${SERVICE}-$MISSING"), "api-$MISSING");
        assert_eq!(ctx.resolve("dist/$SERVICE"), ctx.workspace.join("dist/api"));
        assert_eq!(ctx.resolve("/tmp/x"), PathBuf::from("/tmp/x"));
    }

    #[tokio::test]
    async fn test_credentials_are_masked_in_logs() {
        let dir = tempfile::tempdir().unwrap();
        let job = dispatched_job(vec![KeyVal::credential("TOKEN", "s3cr3t")]);
        let (ctx, logs) = test_context(dir.path(), &job).await;

        ctx.step_info("clone", "using token s3cr3t");

        let entries = logs.drain();
        assert_eq!(entries[0].message, "using token ********");
        assert_eq!(entries[0].step.as_deref(), Some("clone"));
    }

    #[tokio::test]
    async fn test_read_outputs_trims_and_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let job = dispatched_job(Vec::new());
        let (ctx, _) = test_context(dir.path(), &job).await;
        tokio::fs::write(ctx.outputs_dir.join("IMAGE"), "reg/api:1\n").await.unwrap();

        let outputs = ctx
            .read_outputs(&[Output::named("IMAGE"), Output::named("VERSION")])
            .await;

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["IMAGE"], "reg/api:1");
    }
}
