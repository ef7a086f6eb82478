//! Job specification types
//!
//! `JobSpec` is a closed union with one variant per job type. Each variant
//! carries the user-editable configuration the compiler turns into job tasks.

use serde::{Deserialize, Serialize};

use crate::domain::catalog::{CacheMedium, Registry};
use crate::domain::common::{
    Infrastructure, JobSource, KeyVal, Output, Repository, ServiceTarget,
};
use crate::domain::step::StepTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    #[serde(rename = "build")]
    Build,
    #[serde(rename = "scanning")]
    Scanning,
    #[serde(rename = "distribute-image")]
    Distribute,
    #[serde(rename = "deploy")]
    Deploy,
    #[serde(rename = "sql")]
    Sql,
    #[serde(rename = "plugin")]
    Plugin,
    #[serde(rename = "freestyle")]
    Freestyle,
    #[serde(rename = "approval")]
    Approval,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobType::Build => "build",
            JobType::Scanning => "scanning",
            JobType::Distribute => "distribute-image",
            JobType::Deploy => "deploy",
            JobType::Sql => "sql",
            JobType::Plugin => "plugin",
            JobType::Freestyle => "freestyle",
            JobType::Approval => "approval",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "spec")]
pub enum JobSpec {
    #[serde(rename = "build")]
    Build(BuildJobSpec),
    #[serde(rename = "scanning")]
    Scanning(ScanningJobSpec),
    #[serde(rename = "distribute-image")]
    Distribute(DistributeImageJobSpec),
    #[serde(rename = "deploy")]
    Deploy(DeployJobSpec),
    #[serde(rename = "sql")]
    Sql(SqlJobSpec),
    #[serde(rename = "plugin")]
    Plugin(PluginJobSpec),
    #[serde(rename = "freestyle")]
    Freestyle(FreestyleJobSpec),
    #[serde(rename = "approval")]
    Approval(ApprovalJobSpec),
}

impl JobSpec {
    pub fn job_type(&self) -> JobType {
        match self {
            JobSpec::Build(_) => JobType::Build,
            JobSpec::Scanning(_) => JobType::Scanning,
            JobSpec::Distribute(_) => JobType::Distribute,
            JobSpec::Deploy(_) => JobType::Deploy,
            JobSpec::Sql(_) => JobType::Sql,
            JobSpec::Plugin(_) => JobType::Plugin,
            JobSpec::Freestyle(_) => JobType::Freestyle,
            JobSpec::Approval(_) => JobType::Approval,
        }
    }
}

// =============================================================================
// Build
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildJobSpec {
    #[serde(default)]
    pub docker_registry_id: String,
    #[serde(default)]
    pub service_and_builds: Vec<ServiceAndBuild>,
    #[serde(default)]
    pub service_and_builds_options: Vec<ServiceAndBuild>,
}

/// One service module bound to the build that produces it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceAndBuild {
    pub service_name: String,
    pub service_module: String,
    pub build_name: String,
    #[serde(default)]
    pub image_name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub key_vals: Vec<KeyVal>,
    #[serde(default)]
    pub repos: Vec<Repository>,
}

impl ServiceAndBuild {
    pub fn target(&self) -> ServiceTarget {
        ServiceTarget::new(&self.service_name, &self.service_module)
    }
}

// =============================================================================
// Scanning
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanningType {
    #[default]
    Normal,
    Service,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanningJobSpec {
    #[serde(default)]
    pub scanning_type: ScanningType,
    #[serde(default)]
    pub source: JobSource,
    /// Upstream job the service targets are taken from
    #[serde(default)]
    pub job_name: String,
    #[serde(default)]
    pub origin_job_name: String,
    #[serde(default)]
    pub scannings: Vec<ScanningModule>,
    #[serde(default)]
    pub service_and_scannings: Vec<ServiceAndScannings>,
    #[serde(default)]
    pub target_services: Vec<ServiceTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanningModule {
    pub name: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub key_vals: Vec<KeyVal>,
    #[serde(default)]
    pub repos: Vec<Repository>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceAndScannings {
    pub service_name: String,
    pub service_module: String,
    #[serde(default)]
    pub scannings: Vec<ScanningModule>,
}

// =============================================================================
// Distribute
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributeImageJobSpec {
    #[serde(default)]
    pub source: JobSource,
    #[serde(default)]
    pub job_name: String,
    #[serde(default)]
    pub source_registry_id: String,
    #[serde(default)]
    pub target_registry_id: String,
    #[serde(default)]
    pub targets: Vec<DistributeTarget>,
    #[serde(default)]
    pub target_options: Vec<DistributeTarget>,
    /// Minutes, 0 means the default
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub strategy_id: String,
    #[serde(default)]
    pub enable_target_image_tag_rule: bool,
    #[serde(default)]
    pub target_image_tag_rule: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributeTarget {
    pub service_name: String,
    pub service_module: String,
    #[serde(default)]
    pub image_name: String,
    #[serde(default)]
    pub source_tag: String,
    #[serde(default)]
    pub target_tag: String,
    #[serde(default)]
    pub source_image: String,
    #[serde(default)]
    pub target_image: String,
    #[serde(default)]
    pub update_tag: bool,
}

// =============================================================================
// Deploy
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployJobSpec {
    pub env: String,
    #[serde(default)]
    pub production: bool,
    #[serde(default)]
    pub source: JobSource,
    #[serde(default)]
    pub job_name: String,
    #[serde(default)]
    pub origin_job_name: String,
    #[serde(default)]
    pub services: Vec<DeployServiceInfo>,
    #[serde(default)]
    pub service_options: Vec<DeployServiceInfo>,
    /// Minutes, 0 means the default
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub skip_check_run_status: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployServiceInfo {
    pub service_name: String,
    #[serde(default)]
    pub modules: Vec<DeployModule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployModule {
    pub service_module: String,
    #[serde(default)]
    pub image_name: String,
    #[serde(default)]
    pub image: String,
}

// =============================================================================
// SQL, Plugin, Freestyle, Approval
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlJobSpec {
    pub db_instance_id: String,
    pub sql: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginJobSpec {
    #[serde(default)]
    pub properties: JobProperties,
    pub plugin: PluginTemplate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginTemplate {
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub image: String,
    #[serde(default)]
    pub cmds: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub envs: Vec<KeyVal>,
    /// Values supplied by the user, referenced as `$(inputs.NAME)`
    #[serde(default)]
    pub inputs: Vec<KeyVal>,
    #[serde(default)]
    pub outputs: Vec<Output>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FreestyleJobSpec {
    #[serde(default)]
    pub properties: JobProperties,
    /// Cloned by a leading git step when no step clones them explicitly
    #[serde(default)]
    pub repos: Vec<Repository>,
    #[serde(default)]
    pub steps: Vec<StepTask>,
    #[serde(default)]
    pub outputs: Vec<Output>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalJobSpec {
    /// Minutes, 0 means the default
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub approvers: Vec<String>,
    #[serde(default)]
    pub needed_approvers: usize,
    #[serde(default)]
    pub description: String,
}

// =============================================================================
// Execution properties
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheDirType {
    #[default]
    Workspace,
    UserDefined,
}

/// Execution environment of a freestyle-shaped job task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProperties {
    /// Minutes, 0 means the default
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub infrastructure: Infrastructure,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub strategy_id: String,
    #[serde(default)]
    pub build_os: String,
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub image_from: String,
    #[serde(default)]
    pub envs: Vec<KeyVal>,
    #[serde(default)]
    pub custom_envs: Vec<KeyVal>,
    #[serde(default)]
    pub cache_enable: bool,
    #[serde(default)]
    pub cache_dir_type: CacheDirType,
    #[serde(default)]
    pub cache_user_dir: String,
    #[serde(default)]
    pub cache: Option<CacheMedium>,
    #[serde(default)]
    pub registries: Vec<Registry>,
    #[serde(default)]
    pub use_host_docker_daemon: bool,
}
