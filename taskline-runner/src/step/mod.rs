//! Step executors
//!
//! One executor per step type. The job executor runs them in the order the
//! compiler fixed and owns the status transitions; an executor only does
//! the work and reports success or a `StepError`.

mod archive;
mod debug;
mod distribute;
mod docker;
mod git;
mod script;
mod sonar;
mod tools;

use async_trait::async_trait;
use taskline_core::domain::step::{StepSpec, StepTask};
use thiserror::Error;

use crate::context::JobContext;
use crate::object_store::ObjectStoreError;

#[derive(Debug, Error)]
pub enum StepError {
    #[error("{0}")]
    Invalid(String),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command `{command}` exited with code {code}")]
    Exit { command: String, code: i32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Check(String),
}

impl StepError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn run(&self, step: &StepTask, ctx: &JobContext) -> Result<(), StepError>;
}

/// Executor for a step, by its spec
pub fn executor_for(spec: &StepSpec) -> Box<dyn StepExecutor> {
    match spec {
        StepSpec::Tools(spec) => Box::new(tools::ToolInstallExecutor::new(spec.clone())),
        StepSpec::Git(spec) => Box::new(git::GitExecutor::new(spec.clone())),
        StepSpec::Shell(spec) => Box::new(script::ScriptExecutor::shell(spec.clone())),
        StepSpec::BatchFile(spec) => Box::new(script::ScriptExecutor::batch_file(spec.clone())),
        StepSpec::PowerShell(spec) => Box::new(script::ScriptExecutor::power_shell(spec.clone())),
        StepSpec::DockerBuild(spec) => Box::new(docker::DockerBuildExecutor::new(spec.clone())),
        StepSpec::Archive(spec) => Box::new(archive::ArchiveExecutor::new(spec.clone())),
        StepSpec::TarArchive(spec) => Box::new(archive::TarArchiveExecutor::new(spec.clone())),
        StepSpec::DownloadArchive(spec) => {
            Box::new(archive::DownloadArchiveExecutor::new(spec.clone()))
        }
        StepSpec::DistributeImage(spec) => {
            Box::new(distribute::DistributeImageExecutor::new(spec.clone()))
        }
        StepSpec::SonarGetMetrics(spec) => Box::new(sonar::SonarMetricsExecutor::new(spec.clone())),
        StepSpec::SonarCheck(spec) => Box::new(sonar::SonarCheckExecutor::new(spec.clone())),
        StepSpec::DebugBefore(spec) => Box::new(debug::DebugExecutor::before(spec.clone())),
        StepSpec::DebugAfter(spec) => Box::new(debug::DebugExecutor::after(spec.clone())),
    }
}

/// Credentials a step carries in its spec, to be masked in the job log
pub fn step_secrets(spec: &StepSpec) -> Vec<String> {
    let secrets: Vec<&str> = match spec {
        StepSpec::Git(spec) => spec.repos.iter().map(|r| r.oauth_token.as_str()).collect(),
        StepSpec::DockerBuild(spec) => spec
            .docker_registry
            .iter()
            .map(|r| r.secret_key.as_str())
            .collect(),
        StepSpec::DistributeImage(spec) => spec
            .source_registry
            .iter()
            .chain(spec.target_registry.iter())
            .map(|r| r.secret_key.as_str())
            .collect(),
        StepSpec::Archive(spec) => spec
            .object_storage
            .iter()
            .map(|s| s.secret_key.as_str())
            .collect(),
        StepSpec::TarArchive(spec) => spec
            .object_storage
            .iter()
            .map(|s| s.secret_key.as_str())
            .collect(),
        StepSpec::DownloadArchive(spec) => spec
            .object_storage
            .iter()
            .map(|s| s.secret_key.as_str())
            .collect(),
        StepSpec::SonarGetMetrics(spec) => vec![spec.sonar_token.as_str()],
        StepSpec::SonarCheck(spec) => vec![spec.sonar_token.as_str()],
        _ => Vec::new(),
    };
    secrets
        .into_iter()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskline_core::domain::common::Repository;
    use taskline_core::domain::step::{StepGitSpec, StepScriptSpec, StepSonarCheckSpec};

    #[test]
    fn test_step_secrets_skip_empty_values() {
        let git = StepSpec::Git(StepGitSpec {
            repos: vec![
                Repository {
                    oauth_token: "ghp_x".to_string(),
                    ..Default::default()
                },
                Repository::default(),
            ],
        });
        assert_eq!(step_secrets(&git), vec!["ghp_x".to_string()]);

        let sonar = StepSpec::SonarCheck(StepSonarCheckSpec::default());
        assert!(step_secrets(&sonar).is_empty());
        assert!(step_secrets(&StepSpec::Shell(StepScriptSpec::default())).is_empty());
    }
}
