//! Step types
//!
//! A step is the smallest unit the runner executes. Each compiled job task
//! holds an ordered list of steps; the order is fixed at compile time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::catalog::{ObjectStorage, Registry};
use crate::domain::common::{Repository, ScriptType};
use crate::domain::status::StepStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTask {
    pub name: String,
    #[serde(default)]
    pub job_name: String,
    #[serde(default)]
    pub job_key: String,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub spec: StepSpec,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl StepTask {
    pub fn new(name: impl Into<String>, spec: StepSpec) -> Self {
        Self {
            name: name.into(),
            job_name: String::new(),
            job_key: String::new(),
            status: StepStatus::NotRun,
            error: None,
            spec,
            start_time: None,
            end_time: None,
        }
    }

    pub fn step_type(&self) -> StepType {
        self.spec.step_type()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Tools,
    Git,
    Shell,
    BatchFile,
    PowerShell,
    DockerBuild,
    Archive,
    TarArchive,
    DownloadArchive,
    DistributeImage,
    SonarGetMetrics,
    SonarCheck,
    DebugBefore,
    DebugAfter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "spec", rename_all = "snake_case")]
pub enum StepSpec {
    Tools(StepToolInstallSpec),
    Git(StepGitSpec),
    Shell(StepScriptSpec),
    BatchFile(StepScriptSpec),
    PowerShell(StepScriptSpec),
    DockerBuild(StepDockerBuildSpec),
    Archive(StepArchiveSpec),
    TarArchive(StepTarArchiveSpec),
    DownloadArchive(StepDownloadArchiveSpec),
    DistributeImage(StepImageDistributeSpec),
    SonarGetMetrics(StepSonarGetMetricsSpec),
    SonarCheck(StepSonarCheckSpec),
    DebugBefore(StepDebugSpec),
    DebugAfter(StepDebugSpec),
}

impl StepSpec {
    pub fn step_type(&self) -> StepType {
        match self {
            StepSpec::Tools(_) => StepType::Tools,
            StepSpec::Git(_) => StepType::Git,
            StepSpec::Shell(_) => StepType::Shell,
            StepSpec::BatchFile(_) => StepType::BatchFile,
            StepSpec::PowerShell(_) => StepType::PowerShell,
            StepSpec::DockerBuild(_) => StepType::DockerBuild,
            StepSpec::Archive(_) => StepType::Archive,
            StepSpec::TarArchive(_) => StepType::TarArchive,
            StepSpec::DownloadArchive(_) => StepType::DownloadArchive,
            StepSpec::DistributeImage(_) => StepType::DistributeImage,
            StepSpec::SonarGetMetrics(_) => StepType::SonarGetMetrics,
            StepSpec::SonarCheck(_) => StepType::SonarCheck,
            StepSpec::DebugBefore(_) => StepType::DebugBefore,
            StepSpec::DebugAfter(_) => StepType::DebugAfter,
        }
    }

    /// Failures of these steps are logged and the job carries on
    pub fn ignore_err(&self) -> bool {
        match self {
            StepSpec::TarArchive(spec) => spec.ignore_err,
            StepSpec::DownloadArchive(spec) => spec.ignore_err,
            StepSpec::Archive(spec) => spec.ignore_err,
            _ => false,
        }
    }

    /// Builds the script step matching a script type
    pub fn script(script_type: ScriptType, spec: StepScriptSpec) -> Self {
        match script_type {
            ScriptType::Shell => StepSpec::Shell(spec),
            ScriptType::BatchFile => StepSpec::BatchFile(spec),
            ScriptType::PowerShell => StepSpec::PowerShell(spec),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Shell snippet that installs the tool, `$VERSION` is substituted
    #[serde(default)]
    pub install_script: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepToolInstallSpec {
    #[serde(default)]
    pub installs: Vec<Tool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepGitSpec {
    #[serde(default)]
    pub repos: Vec<Repository>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepScriptSpec {
    pub script: String,
    /// Run the script as-is without the runner's preamble
    #[serde(default)]
    pub skip_prepare: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepDockerBuildSpec {
    #[serde(default)]
    pub work_dir: String,
    #[serde(default)]
    pub docker_file: String,
    pub image_name: String,
    #[serde(default)]
    pub build_args: String,
    #[serde(default)]
    pub docker_registry: Option<Registry>,
    #[serde(default)]
    pub enable_buildkit: bool,
    #[serde(default)]
    pub platform: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadDetail {
    pub file_path: String,
    pub dest_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepArchiveSpec {
    #[serde(default)]
    pub upload_detail: Vec<UploadDetail>,
    #[serde(default)]
    pub object_storage: Option<ObjectStorage>,
    #[serde(default)]
    pub ignore_err: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepTarArchiveSpec {
    #[serde(default)]
    pub result_dirs: Vec<String>,
    pub file_name: String,
    #[serde(default)]
    pub dest_dir: String,
    /// Object key prefix the archive is uploaded under
    #[serde(default)]
    pub object_path: String,
    #[serde(default)]
    pub object_storage: Option<ObjectStorage>,
    #[serde(default)]
    pub ignore_err: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepDownloadArchiveSpec {
    pub file_name: String,
    #[serde(default)]
    pub dest_dir: String,
    #[serde(default)]
    pub object_path: String,
    #[serde(default)]
    pub object_storage: Option<ObjectStorage>,
    #[serde(default)]
    pub un_tar: bool,
    #[serde(default)]
    pub ignore_err: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepImageDistributeSpec {
    #[serde(default)]
    pub source_registry: Option<Registry>,
    #[serde(default)]
    pub target_registry: Option<Registry>,
    #[serde(default)]
    pub distribute_target: Vec<DistributeTaskTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributeTaskTarget {
    pub service_name: String,
    pub service_module: String,
    #[serde(default)]
    pub image_name: String,
    #[serde(default)]
    pub source_image: String,
    #[serde(default)]
    pub target_tag: String,
    #[serde(default)]
    pub target_image: String,
    #[serde(default)]
    pub update_tag: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepSonarGetMetricsSpec {
    pub project_key: String,
    #[serde(default)]
    pub branch: String,
    pub sonar_server: String,
    #[serde(default)]
    pub sonar_token: String,
    /// Directory holding the scanner's `report-task.txt`
    #[serde(default)]
    pub check_dir: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepSonarCheckSpec {
    #[serde(default)]
    pub parameter: String,
    pub sonar_server: String,
    #[serde(default)]
    pub sonar_token: String,
    #[serde(default)]
    pub check_dir: String,
    /// Minutes to wait for the analysis to finish
    #[serde(default)]
    pub wait_timeout: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepDebugSpec {
    /// Pause execution at this point until the marker file is removed
    #[serde(default)]
    pub breakpoint: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignore_err_only_on_cache_and_archive_steps() {
        let tar = StepSpec::TarArchive(StepTarArchiveSpec {
            file_name: "cache.tar.gz".to_string(),
            ignore_err: true,
            ..Default::default()
        });
        assert!(tar.ignore_err());

        let shell = StepSpec::Shell(StepScriptSpec::default());
        assert!(!shell.ignore_err());
    }

    #[test]
    fn test_script_step_follows_script_type() {
        let spec = StepSpec::script(ScriptType::PowerShell, StepScriptSpec::default());
        assert_eq!(spec.step_type(), StepType::PowerShell);
    }

    #[test]
    fn test_step_task_flattens_spec() {
        let step = StepTask::new(
            "svc-git",
            StepSpec::Git(StepGitSpec {
                repos: vec![Repository {
                    repo_name: "api".to_string(),
                    ..Default::default()
                }],
            }),
        );
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], "git");
        assert_eq!(json["status"], "not_run");
        let back: StepTask = serde_json::from_value(json).unwrap();
        assert_eq!(back, step);
    }
}
