//! Job Compiler
//!
//! Turns the jobs of a workflow definition into executable job tasks.
//! `JobCompiler` is the single entry point; it dispatches on the job spec
//! variant to the per-type modules below. Besides compiling, it maintains
//! the user-facing selection state of a job: presets resolved against the
//! catalog, the option pools a trigger form offers, and the merging of
//! trigger-time arguments onto the stored definition.

pub mod approval;
pub mod build;
pub mod deploy;
pub mod distribute;
pub mod env;
pub mod freestyle;
pub mod merge;
pub mod plugin;
pub mod scanning;
pub mod sql;
pub mod upstream;

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use taskline_core::domain::common::{JobSource, Repository};
use taskline_core::domain::job::{JobSpec, JobType};
use taskline_core::domain::status::Status;
use taskline_core::domain::task::{JobTask, JobTaskSpec, StageTask};
use taskline_core::domain::workflow::{ErrorPolicy, Job, WorkflowDefinition};

use crate::catalog::CatalogReader;
use crate::repository::StoreError;

static JOB_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]{0,31}$").expect("job name pattern is valid"));

/// Minutes a distribute or deploy job may run when it sets no timeout
pub const DEFAULT_SHORT_TIMEOUT: u64 = 10;
/// Minutes for every other job type
pub const DEFAULT_TIMEOUT: u64 = 60;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("invalid job name {0:?}, must match ^[a-z][a-z0-9-]{{0,31}}$")]
    InvalidJobName(String),

    #[error("job {0} takes its targets from another job but names none")]
    MissingSourceJob(String),

    #[error("duplicate job key {0}")]
    DuplicateKey(String),

    #[error("referred job {0} not found")]
    ReferredJobNotFound(String),

    #[error("can not quote job {referred} in job {job}")]
    InvalidReference { referred: String, job: String },

    #[error("job {referred} of type {job_type} can not be referenced")]
    UnsupportedReference { referred: String, job_type: JobType },

    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    #[error("failed to find the original workflow: {0}")]
    WorkflowNotFound(String),

    #[error("job {job}: {message}")]
    Invalid { job: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to render job spec: {0}")]
    Render(#[from] serde_json::Error),
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Turns a missing catalog record into `CompileError::NotFound`
pub(crate) trait Required<T> {
    fn required(self, kind: &'static str, key: &str) -> CompileResult<T>;
}

impl<T> Required<T> for Option<T> {
    fn required(self, kind: &'static str, key: &str) -> CompileResult<T> {
        self.ok_or_else(|| CompileError::NotFound {
            kind,
            key: key.to_string(),
        })
    }
}

// =============================================================================
// Compiler
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct CompilerSettings {
    /// Public address of the system, used in task and build URLs
    pub system_address: String,
}

/// What every per-type operation needs to know about its surroundings
pub(crate) struct CompileCtx<'a> {
    pub catalog: &'a CatalogReader,
    pub settings: &'a CompilerSettings,
    pub workflow: &'a WorkflowDefinition,
    pub job_name: &'a str,
    pub error_policy: ErrorPolicy,
}

#[derive(Clone)]
pub struct JobCompiler {
    catalog: CatalogReader,
    settings: CompilerSettings,
}

impl JobCompiler {
    pub fn new(catalog: CatalogReader, settings: CompilerSettings) -> Self {
        Self { catalog, settings }
    }

    fn ctx<'a>(&'a self, workflow: &'a WorkflowDefinition, job_name: &'a str, error_policy: ErrorPolicy) -> CompileCtx<'a> {
        CompileCtx {
            catalog: &self.catalog,
            settings: &self.settings,
            workflow,
            job_name,
            error_policy,
        }
    }

    /// Validates the job name and normalizes the user-entered fields
    pub fn instantiate(&self, job: &mut Job) -> CompileResult<()> {
        job.name = job.name.trim().to_string();
        if !JOB_NAME.is_match(&job.name) {
            return Err(CompileError::InvalidJobName(job.name.clone()));
        }

        match &mut job.spec {
            JobSpec::Build(spec) => {
                for item in spec.service_and_builds.iter_mut() {
                    trim(&mut item.service_name);
                    trim(&mut item.service_module);
                    trim(&mut item.build_name);
                }
            }
            JobSpec::Scanning(spec) => {
                trim(&mut spec.job_name);
                check_source(&job.name, spec.source, &spec.job_name)?;
            }
            JobSpec::Distribute(spec) => {
                trim(&mut spec.job_name);
                check_source(&job.name, spec.source, &spec.job_name)?;
                for target in spec.targets.iter_mut() {
                    trim(&mut target.service_name);
                    trim(&mut target.service_module);
                    trim(&mut target.source_tag);
                }
            }
            JobSpec::Deploy(spec) => {
                trim(&mut spec.env);
                trim(&mut spec.job_name);
                check_source(&job.name, spec.source, &spec.job_name)?;
            }
            JobSpec::Sql(spec) => trim(&mut spec.db_instance_id),
            JobSpec::Plugin(_) | JobSpec::Freestyle(_) | JobSpec::Approval(_) => {}
        }
        Ok(())
    }

    /// Resolves the selected items of a job against the latest catalog
    pub async fn set_preset(&self, job: &mut Job, workflow: &WorkflowDefinition) -> CompileResult<()> {
        let ctx = self.ctx(workflow, &job.name, job.error_policy);
        match &mut job.spec {
            JobSpec::Build(spec) => build::set_preset(&ctx, spec).await,
            JobSpec::Scanning(spec) => scanning::set_preset(&ctx, spec).await,
            JobSpec::Distribute(spec) => distribute::set_preset(&ctx, spec).await,
            JobSpec::Deploy(spec) => deploy::set_preset(&ctx, spec).await,
            JobSpec::Sql(_) | JobSpec::Plugin(_) | JobSpec::Freestyle(_) | JobSpec::Approval(_) => {
                Ok(())
            }
        }
    }

    /// Refreshes the pool of items a trigger may choose from
    pub async fn set_options(
        &self,
        job: &mut Job,
        workflow: &WorkflowDefinition,
        stored: &WorkflowDefinition,
    ) -> CompileResult<()> {
        let ctx = self.ctx(workflow, &job.name, job.error_policy);
        match &mut job.spec {
            JobSpec::Build(spec) => {
                let stored_spec = match stored_job(stored, &job.name, JobType::Build)? {
                    JobSpec::Build(stored_spec) => stored_spec,
                    _ => return Err(CompileError::WorkflowNotFound(stored.name.clone())),
                };
                build::set_options(&ctx, spec, stored_spec).await
            }
            JobSpec::Distribute(spec) => distribute::set_options(&ctx, spec).await,
            JobSpec::Deploy(spec) => deploy::set_options(&ctx, spec).await,
            _ => Ok(()),
        }
    }

    /// Empties the user selections, leaving the option pools alone
    pub fn clear_selection_field(&self, job: &mut Job) {
        match &mut job.spec {
            JobSpec::Build(spec) => build::clear_selection(spec),
            JobSpec::Scanning(spec) => spec.target_services.clear(),
            JobSpec::Distribute(spec) => spec.targets.clear(),
            JobSpec::Deploy(spec) => spec.services.clear(),
            _ => {}
        }
    }

    /// Overlays trigger-time values onto a stored job of the same name and type
    pub fn merge_args(&self, job: &mut Job, args: &Job) -> CompileResult<()> {
        if job.name != args.name || job.job_type() != args.job_type() {
            return Ok(());
        }
        match (&mut job.spec, &args.spec) {
            (JobSpec::Build(spec), JobSpec::Build(args)) => build::merge_args(spec, args),
            (JobSpec::Scanning(spec), JobSpec::Scanning(args)) => scanning::merge_args(spec, args),
            (JobSpec::Distribute(spec), JobSpec::Distribute(args)) => {
                spec.targets = args.targets.clone();
            }
            (JobSpec::Deploy(spec), JobSpec::Deploy(args)) => deploy::merge_args(spec, args),
            (JobSpec::Sql(spec), JobSpec::Sql(args)) => sql::merge_args(spec, args),
            (JobSpec::Plugin(spec), JobSpec::Plugin(args)) => plugin::merge_args(spec, args),
            (JobSpec::Freestyle(spec), JobSpec::Freestyle(args)) => {
                freestyle::merge_args(spec, args)
            }
            (JobSpec::Approval(_), JobSpec::Approval(_)) => {}
            _ => {}
        }
        Ok(())
    }

    /// Reconciles a saved job with the latest definition of the workflow
    pub async fn update_with_latest_setting(
        &self,
        job: &mut Job,
        latest: &WorkflowDefinition,
    ) -> CompileResult<()> {
        let latest_spec = stored_job(latest, &job.name, job.job_type())?;
        let ctx = self.ctx(latest, &job.name, job.error_policy);
        match (&mut job.spec, latest_spec) {
            (JobSpec::Build(spec), JobSpec::Build(latest)) => {
                build::update_with_latest(&ctx, spec, latest).await
            }
            (JobSpec::Scanning(spec), JobSpec::Scanning(latest)) => {
                scanning::update_with_latest(&ctx, spec, latest).await
            }
            (JobSpec::Distribute(spec), JobSpec::Distribute(latest)) => {
                distribute::update_with_latest(spec, latest);
                Ok(())
            }
            (JobSpec::Deploy(spec), JobSpec::Deploy(latest)) => {
                deploy::update_with_latest(spec, latest);
                Ok(())
            }
            (JobSpec::Sql(spec), JobSpec::Sql(latest)) => {
                spec.db_instance_id = latest.db_instance_id.clone();
                spec.sql = latest.sql.clone();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Compiles one definition job into its job tasks
    pub async fn to_jobs(
        &self,
        job: &Job,
        workflow: &WorkflowDefinition,
        task_id: i64,
    ) -> CompileResult<Vec<JobTask>> {
        let ctx = self.ctx(workflow, &job.name, job.error_policy);
        let mut tasks = match &job.spec {
            JobSpec::Build(spec) => build::to_jobs(&ctx, spec, task_id).await?,
            JobSpec::Scanning(spec) => scanning::to_jobs(&ctx, spec, task_id).await?,
            JobSpec::Distribute(spec) => distribute::to_jobs(&ctx, spec).await?,
            JobSpec::Deploy(spec) => deploy::to_jobs(&ctx, spec).await?,
            JobSpec::Sql(spec) => sql::to_jobs(&ctx, spec).await?,
            JobSpec::Plugin(spec) => plugin::to_jobs(&ctx, spec, task_id)?,
            JobSpec::Freestyle(spec) => freestyle::to_jobs(&ctx, spec, task_id)?,
            JobSpec::Approval(spec) => vec![approval::to_job(&ctx, spec)],
        };

        let job_type = job.job_type();
        for task in tasks.iter_mut() {
            finalize(task, job, job_type);
        }
        Ok(tasks)
    }

    /// Checks that from-job references point at a job that finishes first
    pub fn lint_job(&self, job: &Job, workflow: &WorkflowDefinition) -> CompileResult<()> {
        let referred = match &job.spec {
            JobSpec::Scanning(spec) if spec.source == JobSource::FromJob => &spec.job_name,
            JobSpec::Distribute(spec) if spec.source == JobSource::FromJob => &spec.job_name,
            JobSpec::Deploy(spec) if spec.source == JobSource::FromJob => &spec.job_name,
            _ => return Ok(()),
        };

        let ranks = upstream::job_rank_map(workflow);
        let referred_rank = ranks.get(referred.as_str());
        let own_rank = ranks.get(job.name.as_str());
        match (referred_rank, own_rank) {
            (Some(referred_rank), Some(own_rank)) if referred_rank < own_rank => Ok(()),
            _ => Err(CompileError::InvalidReference {
                referred: referred.clone(),
                job: job.name.clone(),
            }),
        }
    }

    /// Placeholders for every output the job will publish
    pub async fn get_outputs(&self, job: &Job, workflow: &WorkflowDefinition) -> CompileResult<Vec<String>> {
        let ctx = self.ctx(workflow, &job.name, job.error_policy);
        match &job.spec {
            JobSpec::Build(spec) => build::get_outputs(&ctx, spec).await,
            JobSpec::Scanning(spec) => scanning::get_outputs(&ctx, spec).await,
            JobSpec::Distribute(spec) => Ok(distribute::get_outputs(&ctx, spec)),
            JobSpec::Deploy(spec) => Ok(deploy::get_outputs(&ctx, spec)),
            JobSpec::Plugin(spec) => Ok(plugin::get_outputs(&ctx, spec)),
            JobSpec::Freestyle(spec) => Ok(freestyle::get_outputs(&ctx, spec)),
            JobSpec::Sql(_) | JobSpec::Approval(_) => Ok(Vec::new()),
        }
    }

    /// Repositories a job will check out, as the trigger form shows them
    pub async fn get_repos(&self, job: &Job, workflow: &WorkflowDefinition) -> CompileResult<Vec<Repository>> {
        let ctx = self.ctx(workflow, &job.name, job.error_policy);
        match &job.spec {
            JobSpec::Build(spec) => build::get_repos(&ctx, spec).await,
            JobSpec::Scanning(spec) => scanning::get_repos(&ctx, spec).await,
            JobSpec::Freestyle(spec) => Ok(spec.repos.clone()),
            _ => Ok(Vec::new()),
        }
    }

    /// Points the job's matching repos at the ref a webhook event carries
    pub fn merge_webhook_repo(&self, job: &mut Job, repo: &Repository) {
        let webhook = std::slice::from_ref(repo);
        match &mut job.spec {
            JobSpec::Build(spec) => {
                for item in spec.service_and_builds.iter_mut() {
                    item.repos = merge::merge_repos(&item.repos, webhook);
                }
            }
            JobSpec::Scanning(spec) => {
                for scanning in spec.scannings.iter_mut() {
                    scanning.repos = merge::merge_repos(&scanning.repos, webhook);
                }
            }
            JobSpec::Freestyle(spec) => {
                spec.repos = merge::merge_repos(&spec.repos, webhook);
            }
            _ => {}
        }
    }

    /// Lints and compiles every job of a workflow, stage by stage
    pub async fn compile_workflow(
        &self,
        workflow: &WorkflowDefinition,
        task_id: i64,
    ) -> CompileResult<Vec<StageTask>> {
        let mut stages = Vec::with_capacity(workflow.stages.len());
        for stage in &workflow.stages {
            let mut jobs = Vec::new();
            for job in &stage.jobs {
                self.lint_job(job, workflow)?;
                jobs.extend(self.to_jobs(job, workflow, task_id).await?);
            }
            stages.push(StageTask {
                name: stage.name.clone(),
                parallel: stage.parallel,
                concurrency: stage.concurrency,
                status: Status::Created,
                jobs,
                start_time: None,
                end_time: None,
            });
        }

        let all: Vec<&JobTask> = stages.iter().flat_map(|stage| stage.jobs.iter()).collect();
        ensure_unique_keys(all)?;
        tracing::debug!(
            "Compiled workflow {} task {} into {} stages",
            workflow.name,
            task_id,
            stages.len()
        );
        Ok(stages)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn trim(value: &mut String) {
    let trimmed = value.trim();
    if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
}

fn check_source(job_name: &str, source: JobSource, source_job: &str) -> CompileResult<()> {
    if source == JobSource::FromJob && source_job.is_empty() {
        return Err(CompileError::MissingSourceJob(job_name.to_string()));
    }
    Ok(())
}

/// The spec of the job with the same name and type in a stored workflow
fn stored_job<'a>(workflow: &'a WorkflowDefinition, name: &str, job_type: JobType) -> CompileResult<&'a JobSpec> {
    workflow
        .jobs()
        .find(|job| job.name == name && job.job_type() == job_type)
        .map(|job| &job.spec)
        .ok_or_else(|| CompileError::WorkflowNotFound(workflow.name.clone()))
}

/// Fills the fields every job task shares
fn finalize(task: &mut JobTask, job: &Job, job_type: JobType) {
    task.origin_name = job.name.clone();
    task.error_policy = job.error_policy;
    if task.display_name.is_empty() {
        task.display_name = job.name.clone();
    }
    if task.timeout == 0 {
        task.timeout = match job_type {
            JobType::Distribute | JobType::Deploy => DEFAULT_SHORT_TIMEOUT,
            _ => DEFAULT_TIMEOUT,
        };
    }

    let (name, key) = (task.name.clone(), task.key.clone());
    if let JobTaskSpec::Freestyle(spec) = &mut task.spec {
        if spec.properties.timeout == 0 {
            spec.properties.timeout = task.timeout;
        }
        for step in spec.steps.iter_mut() {
            step.job_name = name.clone();
            step.job_key = key.clone();
        }
    }
}

/// Job task keys name output namespaces, so a task must not repeat one
pub fn ensure_unique_keys<'a, I>(jobs: I) -> CompileResult<()>
where
    I: IntoIterator<Item = &'a JobTask>,
{
    let mut seen = HashSet::new();
    for job in jobs {
        if !seen.insert(job.key.as_str()) {
            return Err(CompileError::DuplicateKey(job.key.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    use serde::Serialize;
    use taskline_core::domain::catalog::{
        BasicImage, Build, BuildTarget, CatalogKind, Cluster, Environment, ObjectStorage,
        Registry, ServiceContainer, ServiceInfo,
    };
    use taskline_core::domain::common::KeyVal;
    use taskline_core::domain::job::{
        ApprovalJobSpec, BuildJobSpec, DeployJobSpec, DistributeImageJobSpec, ServiceAndBuild,
    };
    use taskline_core::domain::task::JobTaskApprovalSpec;
    use taskline_core::domain::workflow::Stage;

    use crate::repository::{Catalog, MemoryStore};

    pub(crate) async fn put<T: Serialize>(store: &MemoryStore, kind: CatalogKind, key: &str, record: &T) {
        store
            .upsert_record(kind, key, serde_json::to_value(record).unwrap())
            .await
            .unwrap();
    }

    pub(crate) fn compiler_for(store: Arc<MemoryStore>) -> JobCompiler {
        JobCompiler::new(
            CatalogReader::new(store),
            CompilerSettings {
                system_address: "https://ci.example.com".to_string(),
            },
        )
    }

    pub(crate) async fn seeded_compiler() -> JobCompiler {
        compiler_for(seeded_store().await)
    }

    /// A catalog holding one build `api-build` for `api/server` and `api/worker`
    pub(crate) async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        put(
            &store,
            CatalogKind::Registry,
            "reg1",
            &Registry {
                id: "reg1".to_string(),
                reg_addr: "https://harbor.example.com".to_string(),
                namespace: "team".to_string(),
                is_default: true,
                ..Default::default()
            },
        )
        .await;
        put(
            &store,
            CatalogKind::Build,
            "api-build",
            &Build {
                name: "api-build".to_string(),
                scripts: "make build".to_string(),
                pre_build: taskline_core::domain::catalog::PreBuild {
                    image_id: "focal".to_string(),
                    cluster_id: "local".to_string(),
                    envs: vec![KeyVal::new("LEVEL", "debug")],
                    ..Default::default()
                },
                targets: vec![
                    BuildTarget {
                        service_name: "api".to_string(),
                        service_module: "server".to_string(),
                        ..Default::default()
                    },
                    BuildTarget {
                        service_name: "api".to_string(),
                        service_module: "worker".to_string(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            },
        )
        .await;
        put(
            &store,
            CatalogKind::BasicImage,
            "focal",
            &BasicImage {
                id: "focal".to_string(),
                value: "ubuntu:focal".to_string(),
                ..Default::default()
            },
        )
        .await;
        put(
            &store,
            CatalogKind::Cluster,
            "local",
            &Cluster {
                id: "local".to_string(),
                ..Default::default()
            },
        )
        .await;
        put(
            &store,
            CatalogKind::ObjectStorage,
            "s3",
            &ObjectStorage {
                id: "s3".to_string(),
                is_default: true,
                ..Default::default()
            },
        )
        .await;
        put(
            &store,
            CatalogKind::Service,
            "api",
            &ServiceInfo {
                name: "api".to_string(),
                containers: vec![
                    ServiceContainer {
                        name: "server".to_string(),
                        image: "harbor.example.com/team/api-server:1".to_string(),
                        image_name: "api-server".to_string(),
                    },
                    ServiceContainer {
                        name: "worker".to_string(),
                        image: "harbor.example.com/team/api-worker:1".to_string(),
                        image_name: "api-worker".to_string(),
                    },
                ],
                ..Default::default()
            },
        )
        .await;
        put(
            &store,
            CatalogKind::Environment,
            "dev",
            &Environment {
                name: "dev".to_string(),
                registry_id: "reg1".to_string(),
                namespace: "dev-ns".to_string(),
                services: vec!["api".to_string()],
                ..Default::default()
            },
        )
        .await;
        store
    }

    pub(crate) fn service_and_build(module: &str) -> ServiceAndBuild {
        ServiceAndBuild {
            service_name: "api".to_string(),
            service_module: module.to_string(),
            build_name: "api-build".to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn build_job(name: &str, modules: &[&str]) -> Job {
        Job::new(
            name,
            JobSpec::Build(BuildJobSpec {
                docker_registry_id: "reg1".to_string(),
                service_and_builds: modules.iter().map(|m| service_and_build(m)).collect(),
                ..Default::default()
            }),
        )
    }

    pub(crate) fn workflow(stages: Vec<Vec<Job>>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "release".to_string(),
            project: "shop".to_string(),
            stages: stages
                .into_iter()
                .enumerate()
                .map(|(i, jobs)| Stage {
                    name: format!("stage-{}", i),
                    jobs,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn deploy_from(name: &str, source_job: &str) -> Job {
        Job::new(
            name,
            JobSpec::Deploy(DeployJobSpec {
                env: "dev".to_string(),
                source: JobSource::FromJob,
                job_name: source_job.to_string(),
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_instantiate_rejects_bad_names() {
        let compiler = JobCompiler::new(
            CatalogReader::new(Arc::new(MemoryStore::new())),
            CompilerSettings::default(),
        );
        let mut job = Job::new("Build_1", JobSpec::Approval(ApprovalJobSpec::default()));
        assert!(matches!(
            compiler.instantiate(&mut job),
            Err(CompileError::InvalidJobName(_))
        ));

        let mut job = Job::new(
            " dist ",
            JobSpec::Distribute(DistributeImageJobSpec {
                source: JobSource::FromJob,
                ..Default::default()
            }),
        );
        assert!(matches!(
            compiler.instantiate(&mut job),
            Err(CompileError::MissingSourceJob(name)) if name == "dist"
        ));
    }

    #[tokio::test]
    async fn test_build_targets_get_distinct_keys() {
        let compiler = seeded_compiler().await;
        let job = build_job("build1", &["server", "worker"]);
        let wf = workflow(vec![vec![job.clone()]]);

        let stages = compiler.compile_workflow(&wf, 1).await.unwrap();
        let keys: Vec<&str> = stages[0].jobs.iter().map(|j| j.key.as_str()).collect();

        assert_eq!(keys, vec!["build1.api.server", "build1.api.worker"]);
    }

    #[tokio::test]
    async fn test_duplicate_keys_fail_compilation() {
        let compiler = seeded_compiler().await;
        let job = build_job("build1", &["server", "server"]);
        let wf = workflow(vec![vec![job]]);

        let err = compiler.compile_workflow(&wf, 1).await.unwrap_err();
        assert!(matches!(err, CompileError::DuplicateKey(key) if key == "build1.api.server"));
    }

    #[tokio::test]
    async fn test_lint_requires_earlier_stage() {
        let compiler = seeded_compiler().await;
        let build = build_job("build1", &["server"]);
        let deploy = deploy_from("deploy1", "build1");

        let same_stage = workflow(vec![vec![deploy.clone(), build.clone()]]);
        let err = compiler.lint_job(&deploy, &same_stage).unwrap_err();
        assert_eq!(err.to_string(), "can not quote job build1 in job deploy1");

        let forward = workflow(vec![vec![deploy.clone()], vec![build.clone()]]);
        assert!(compiler.lint_job(&deploy, &forward).is_err());

        let earlier = workflow(vec![vec![build], vec![deploy.clone()]]);
        assert!(compiler.lint_job(&deploy, &earlier).is_ok());
    }

    #[tokio::test]
    async fn test_lint_accepts_earlier_job_of_serial_stage() {
        let compiler = seeded_compiler().await;
        let build = build_job("build1", &["server"]);
        let deploy = deploy_from("deploy1", "build1");

        let serial = workflow(vec![vec![build.clone(), deploy.clone()]]);
        assert!(compiler.lint_job(&deploy, &serial).is_ok());

        let mut parallel = workflow(vec![vec![build, deploy.clone()]]);
        parallel.stages[0].parallel = true;
        let err = compiler.lint_job(&deploy, &parallel).unwrap_err();
        assert_eq!(err.to_string(), "can not quote job build1 in job deploy1");
    }

    #[tokio::test]
    async fn test_set_preset_is_idempotent() {
        let compiler = seeded_compiler().await;
        let mut job = build_job("build1", &["server", "worker"]);
        if let JobSpec::Build(spec) = &mut job.spec {
            spec.service_and_builds.push(ServiceAndBuild {
                build_name: "missing".to_string(),
                ..service_and_build("ghost")
            });
        }
        let wf = workflow(vec![vec![job.clone()]]);

        compiler.set_preset(&mut job, &wf).await.unwrap();
        let once = job.clone();
        compiler.set_preset(&mut job, &wf).await.unwrap();

        assert_eq!(job, once);
        let JobSpec::Build(spec) = &job.spec else {
            panic!("build spec expected");
        };
        assert_eq!(spec.service_and_builds.len(), 2);
        assert_eq!(spec.service_and_builds[0].image_name, "api-server");
        assert_eq!(spec.service_and_builds[0].key_vals[0].key, "LEVEL");
    }

    #[tokio::test]
    async fn test_update_then_merge_round_trip() {
        let compiler = seeded_compiler().await;
        let latest = workflow(vec![vec![build_job("build1", &["server", "worker"])]]);

        let mut saved = build_job("build1", &["server"]);
        if let JobSpec::Build(spec) = &mut saved.spec {
            spec.service_and_builds[0].key_vals = vec![KeyVal::new("LEVEL", "trace")];
        }
        compiler
            .update_with_latest_setting(&mut saved, &latest)
            .await
            .unwrap();

        let mut stored = latest.stages[0].jobs[0].clone();
        compiler.set_preset(&mut stored, &latest).await.unwrap();
        compiler.merge_args(&mut stored, &saved).unwrap();

        let JobSpec::Build(spec) = &stored.spec else {
            panic!("build spec expected");
        };
        assert_eq!(spec.service_and_builds.len(), 1);
        assert_eq!(spec.service_and_builds[0].service_module, "server");
        assert_eq!(spec.service_and_builds[0].key_vals[0].value, "trace");
    }

    #[tokio::test]
    async fn test_defaults_applied_to_every_task() {
        let compiler = seeded_compiler().await;
        let mut job = Job::new("gate", JobSpec::Approval(ApprovalJobSpec::default()));
        job.error_policy = ErrorPolicy::Ignore;
        let wf = workflow(vec![vec![job.clone()]]);

        let tasks = compiler.to_jobs(&job, &wf, 3).await.unwrap();

        assert_eq!(tasks[0].timeout, DEFAULT_TIMEOUT);
        assert_eq!(tasks[0].error_policy, ErrorPolicy::Ignore);
        assert_eq!(tasks[0].origin_name, "gate");
        assert!(matches!(tasks[0].spec, JobTaskSpec::Approval(JobTaskApprovalSpec { .. })));
    }
}
