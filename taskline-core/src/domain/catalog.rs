//! Catalog records
//!
//! Read-only inputs the compiler resolves job selections against: build and
//! scanning configurations, registries, services, environments and the
//! infrastructure records they point to.

use serde::{Deserialize, Serialize};

use crate::domain::common::{Infrastructure, KeyVal, Output, Repository, ScriptType};
use crate::domain::job::CacheDirType;
use crate::domain::step::{Tool, UploadDetail};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    Build,
    BuildTemplate,
    Scanning,
    ScanningTemplate,
    Registry,
    Service,
    Environment,
    DbInstance,
    ObjectStorage,
    Cluster,
    BasicImage,
    Sonar,
}

impl CatalogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogKind::Build => "build",
            CatalogKind::BuildTemplate => "build_template",
            CatalogKind::Scanning => "scanning",
            CatalogKind::ScanningTemplate => "scanning_template",
            CatalogKind::Registry => "registry",
            CatalogKind::Service => "service",
            CatalogKind::Environment => "environment",
            CatalogKind::DbInstance => "db_instance",
            CatalogKind::ObjectStorage => "object_storage",
            CatalogKind::Cluster => "cluster",
            CatalogKind::BasicImage => "basic_image",
            CatalogKind::Sonar => "sonar",
        }
    }
}

impl std::str::FromStr for CatalogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "build" => CatalogKind::Build,
            "build_template" => CatalogKind::BuildTemplate,
            "scanning" => CatalogKind::Scanning,
            "scanning_template" => CatalogKind::ScanningTemplate,
            "registry" => CatalogKind::Registry,
            "service" => CatalogKind::Service,
            "environment" => CatalogKind::Environment,
            "db_instance" => CatalogKind::DbInstance,
            "object_storage" => CatalogKind::ObjectStorage,
            "cluster" => CatalogKind::Cluster,
            "basic_image" => CatalogKind::BasicImage,
            "sonar" => CatalogKind::Sonar,
            other => return Err(format!("unknown catalog kind: {}", other)),
        };
        Ok(kind)
    }
}

// =============================================================================
// Build
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub name: String,
    #[serde(default)]
    pub project: String,
    /// When set, script and settings come from the build template
    #[serde(default)]
    pub template_id: String,
    #[serde(default)]
    pub infrastructure: Infrastructure,
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub pre_build: PreBuild,
    #[serde(default)]
    pub repos: Vec<Repository>,
    #[serde(default)]
    pub script_type: ScriptType,
    #[serde(default)]
    pub scripts: String,
    #[serde(default)]
    pub post_build: PostBuild,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default)]
    pub cache_enable: bool,
    #[serde(default)]
    pub cache_dir_type: CacheDirType,
    #[serde(default)]
    pub cache_user_dir: String,
    /// Service modules this build produces
    #[serde(default)]
    pub targets: Vec<BuildTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildTarget {
    pub service_name: String,
    pub service_module: String,
    /// Per-target overrides of the template envs
    #[serde(default)]
    pub envs: Vec<KeyVal>,
    #[serde(default)]
    pub repos: Vec<Repository>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreBuild {
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub build_os: String,
    #[serde(default)]
    pub image_from: String,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub strategy_id: String,
    #[serde(default)]
    pub envs: Vec<KeyVal>,
    #[serde(default)]
    pub installs: Vec<Tool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostBuild {
    #[serde(default)]
    pub docker_build: Option<DockerBuild>,
    #[serde(default)]
    pub file_archive: Option<FileArchive>,
    #[serde(default)]
    pub object_storage_upload: Option<ObjectStorageUpload>,
    #[serde(default)]
    pub scripts: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerBuild {
    #[serde(default)]
    pub work_dir: String,
    #[serde(default)]
    pub docker_file: String,
    #[serde(default)]
    pub build_args: String,
    #[serde(default)]
    pub enable_buildkit: bool,
    #[serde(default)]
    pub platform: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileArchive {
    pub file_location: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectStorageUpload {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub object_storage_id: String,
    #[serde(default)]
    pub upload_detail: Vec<UploadDetail>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildTemplate {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub infrastructure: Infrastructure,
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub pre_build: PreBuild,
    #[serde(default)]
    pub script_type: ScriptType,
    #[serde(default)]
    pub scripts: String,
    #[serde(default)]
    pub post_build: PostBuild,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default)]
    pub cache_enable: bool,
    #[serde(default)]
    pub cache_dir_type: CacheDirType,
    #[serde(default)]
    pub cache_user_dir: String,
}

// =============================================================================
// Scanning
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScannerType {
    Sonarqube,
    #[default]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scanning {
    pub name: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub template_id: String,
    #[serde(default)]
    pub infrastructure: Infrastructure,
    #[serde(default)]
    pub scanner_type: ScannerType,
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub build_os: String,
    #[serde(default)]
    pub sonar_id: String,
    #[serde(default)]
    pub installs: Vec<Tool>,
    #[serde(default)]
    pub repos: Vec<Repository>,
    /// sonar-project.properties content for the sonar scanner
    #[serde(default)]
    pub parameter: String,
    #[serde(default)]
    pub script_type: ScriptType,
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub enable_scanner: bool,
    #[serde(default)]
    pub check_quality_gate: bool,
    #[serde(default)]
    pub envs: Vec<KeyVal>,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub strategy_id: String,
    #[serde(default)]
    pub cache_enable: bool,
    #[serde(default)]
    pub cache_dir_type: CacheDirType,
    #[serde(default)]
    pub cache_user_dir: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanningTemplate {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub infrastructure: Infrastructure,
    #[serde(default)]
    pub scanner_type: ScannerType,
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub sonar_id: String,
    #[serde(default)]
    pub installs: Vec<Tool>,
    #[serde(default)]
    pub parameter: String,
    #[serde(default)]
    pub script_type: ScriptType,
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub enable_scanner: bool,
    #[serde(default)]
    pub check_quality_gate: bool,
    #[serde(default)]
    pub envs: Vec<KeyVal>,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default)]
    pub timeout: u64,
}

impl Scanning {
    /// Copies the template-owned settings onto a scanning that references it
    pub fn apply_template(&mut self, template: &ScanningTemplate) {
        self.infrastructure = template.infrastructure;
        self.scanner_type = template.scanner_type;
        self.image_id = template.image_id.clone();
        self.sonar_id = template.sonar_id.clone();
        self.installs = template.installs.clone();
        self.parameter = template.parameter.clone();
        self.script_type = template.script_type;
        self.script = template.script.clone();
        self.enable_scanner = template.enable_scanner;
        self.check_quality_gate = template.check_quality_gate;
        self.outputs = template.outputs.clone();
        if self.timeout == 0 {
            self.timeout = template.timeout;
        }
        let mut envs = template.envs.clone();
        for env in envs.iter_mut() {
            if let Some(own) = self.envs.iter().find(|kv| kv.key == env.key) {
                env.value = own.value.clone();
            }
        }
        self.envs = envs;
    }
}

// =============================================================================
// Infrastructure records
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    pub id: String,
    pub reg_addr: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub reg_type: String,
    #[serde(default)]
    pub is_default: bool,
}

impl Registry {
    /// Host part of the registry address, without the scheme
    pub fn host(&self) -> &str {
        self.reg_addr
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
    }

    /// Full image reference in this registry
    pub fn image(&self, name: &str, tag: &str) -> String {
        if self.namespace.is_empty() {
            format!("{}/{}:{}", self.host(), name, tag)
        } else {
            format!("{}/{}/{}:{}", self.host(), self.namespace, name, tag)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub containers: Vec<ServiceContainer>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceContainer {
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub image_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub production: bool,
    #[serde(default)]
    pub registry_id: String,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub namespace: String,
    /// Services deployed in this environment
    #[serde(default)]
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbType {
    Mysql,
    Mariadb,
    Postgres,
    Oracle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbInstance {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub db_type: DbType,
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStorage {
    pub id: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMediumType {
    #[default]
    Object,
    Nfs,
}

/// Where a cluster keeps build caches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMedium {
    #[serde(default)]
    pub medium_type: CacheMediumType,
    #[serde(default)]
    pub object_storage_id: String,
    #[serde(default)]
    pub nfs_pvc: String,
    #[serde(default)]
    pub nfs_subpath: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Absent means caching is disabled on this cluster
    #[serde(default)]
    pub cache: Option<CacheMedium>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicImage {
    pub id: String,
    /// OS identifier, e.g. `focal`
    pub value: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub image_from: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SonarIntegration {
    pub id: String,
    pub server_address: String,
    #[serde(default)]
    pub token: String,
}
