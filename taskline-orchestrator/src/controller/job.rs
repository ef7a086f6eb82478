//! Job controllers
//!
//! `run_job` drives a single job task: it marks the job running, lets the
//! controller for its kind bring it to a terminal status, always cleans
//! up, and records a `JobInfo` for auditing. Every state change is
//! acknowledged into the task document.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use taskline_core::domain::catalog::DbType;
use taskline_core::domain::job_info::JobInfo;
use taskline_core::domain::log::LogLevel;
use taskline_core::domain::status::{Status, StepStatus};
use taskline_core::domain::task::{
    JobTask, JobTaskApprovalSpec, JobTaskDeploySpec, JobTaskSpec, JobTaskSqlSpec, SqlExecResult,
    SqlExecStatus,
};
use taskline_core::dto::dispatch::DispatchedJob;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::sql::split_statements;
use super::step::step_ctl;
use super::{ControllerError, ControllerServices, DeployRequest};
use crate::compiler::deploy::module_image_key;
use crate::dispatch::DispatchEvent;
use crate::scheduler::decision::{ApprovalOutcome, ApprovalPoll, DecisionKey};
use crate::scheduler::TaskHandle;

/// Everything a job controller runs against
#[derive(Clone)]
pub struct JobEnv {
    pub task: Arc<TaskHandle>,
    pub services: Arc<ControllerServices>,
}

impl JobEnv {
    pub async fn ack(&self, job: &JobTask) {
        self.task.ack_job(job).await;
    }

    async fn log(&self, job: &JobTask, level: LogLevel, message: impl Into<String>) {
        self.services
            .logs
            .write(
                &self.task.workflow_name,
                self.task.task_id,
                &job.name,
                level,
                message,
            )
            .await;
    }
}

/// Why a job stopped before passing
struct Halt {
    status: Status,
    error: Option<String>,
}

impl Halt {
    fn failed(error: impl ToString) -> Self {
        Self {
            status: Status::Failed,
            error: Some(error.to_string()),
        }
    }

    fn with(status: Status, error: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(error.into()),
        }
    }

    fn cancelled() -> Self {
        Self {
            status: Status::Cancelled,
            error: None,
        }
    }
}

type Outcome = Result<(), Halt>;

fn finish(job: &mut JobTask, outcome: Outcome) {
    match outcome {
        Ok(()) => job.finish(Status::Passed, None),
        Err(halt) => job.finish(halt.status, halt.error),
    }
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.max(1) * 60)
}

#[async_trait]
pub trait JobCtl: Send + Sync {
    fn env(&self) -> &JobEnv;

    /// Brings the job to a terminal status
    async fn run(&self, job: &mut JobTask, cancel: &CancellationToken);

    async fn clean(&self, _job: &JobTask) {}

    async fn save_info(&self, job: &JobTask) -> Result<(), ControllerError> {
        let env = self.env();
        let field = |name: &str| job.job_info.get(name).cloned().unwrap_or_default();
        let duration_secs = match (job.start_time, job.end_time) {
            (Some(start), Some(end)) => (end - start).num_seconds(),
            _ => 0,
        };
        let info = JobInfo {
            id: Uuid::new_v4(),
            job_type: job.job_type,
            job_name: job.name.clone(),
            workflow_name: env.task.workflow_name.clone(),
            workflow_display_name: env.task.workflow_display_name.clone(),
            task_id: env.task.task_id,
            project: env.task.project.clone(),
            service_name: field("service_name"),
            service_module: field("service_module"),
            start_time: job.start_time,
            end_time: job.end_time,
            duration_secs,
            status: job.status,
        };
        env.services.job_infos.insert_job_info(&info).await?;
        Ok(())
    }
}

pub fn job_ctl(job: &JobTask, env: JobEnv) -> Box<dyn JobCtl> {
    match &job.spec {
        JobTaskSpec::Freestyle(_) => Box::new(FreestyleJobCtl {
            env,
            dispatch_id: Mutex::new(None),
        }),
        JobTaskSpec::Sql(_) => Box::new(SqlJobCtl { env }),
        JobTaskSpec::Deploy(_) => Box::new(DeployJobCtl { env }),
        JobTaskSpec::Approval(_) => Box::new(ApprovalJobCtl { env }),
    }
}

/// Runs a job task to completion and returns its final state
pub async fn run_job(env: JobEnv, mut job: JobTask, cancel: CancellationToken) -> JobTask {
    let ctl = job_ctl(&job, env.clone());

    job.status = Status::Running;
    job.start_time = Some(Utc::now());
    env.ack(&job).await;
    tracing::info!(
        "Job {} of {}#{} started",
        job.name,
        env.task.workflow_name,
        env.task.task_id
    );

    if cancel.is_cancelled() {
        job.finish(Status::Cancelled, None);
    } else {
        ctl.run(&mut job, &cancel).await;
    }
    if !job.status.is_terminal() {
        job.finish(Status::Failed, Some("job ended without a final status".to_string()));
    }

    ctl.clean(&job).await;
    env.ack(&job).await;
    if let Err(e) = ctl.save_info(&job).await {
        tracing::warn!("Failed to save job info of {}: {}", job.name, e);
    }

    tracing::info!(
        "Job {} of {}#{} finished with {}",
        job.name,
        env.task.workflow_name,
        env.task.task_id,
        job.status
    );
    job
}

// =============================================================================
// Freestyle
// =============================================================================

/// Build, scanning, distribute, plugin and freestyle jobs: the step list
/// runs on a runner
pub struct FreestyleJobCtl {
    env: JobEnv,
    dispatch_id: Mutex<Option<Uuid>>,
}

impl FreestyleJobCtl {
    /// Renders placeholders and runs every step's pre-run hook
    fn prepare(&self, job: &mut JobTask) -> Outcome {
        let JobTaskSpec::Freestyle(spec) = &mut job.spec else {
            return Err(Halt::failed("not a freestyle job"));
        };
        *spec = self.env.task.global.render_value(spec).map_err(Halt::failed)?;

        for step in spec.steps.iter_mut() {
            let ctl = step_ctl(&step.spec);
            if let Err(e) = ctl.pre_run(step) {
                step.status = StepStatus::Failed;
                step.error = Some(e.to_string());
                return Err(Halt::failed(format!("step {}: {}", step.name, e)));
            }
        }
        Ok(())
    }

    async fn dispatch_and_wait(&self, job: &mut JobTask, cancel: &CancellationToken) -> Outcome {
        let JobTaskSpec::Freestyle(spec) = &job.spec else {
            return Err(Halt::failed("not a freestyle job"));
        };
        let dispatched = DispatchedJob {
            dispatch_id: Uuid::new_v4(),
            workflow_name: self.env.task.workflow_name.clone(),
            task_id: self.env.task.task_id,
            job_name: job.name.clone(),
            job_key: job.key.clone(),
            infrastructure: job.infrastructure,
            timeout: job.timeout,
            properties: spec.properties.clone(),
            steps: spec.steps.clone(),
            outputs: job.outputs.clone(),
        };
        let dispatch_id = dispatched.dispatch_id;
        let deadline = dispatched.timeout_duration() + self.env.services.dispatch_grace;

        let dispatcher = &self.env.services.dispatcher;
        let mut events = dispatcher.dispatch(dispatched).await.map_err(Halt::failed)?;
        *self.dispatch_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(dispatch_id);

        let deadline = tokio::time::sleep(deadline);
        tokio::pin!(deadline);
        let mut cancel_sent = false;

        let completion = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(DispatchEvent::Step(update)) => {
                        if let Some(steps) = job.steps_mut() {
                            if let Some(step) = steps.iter_mut().find(|s| s.name == update.name) {
                                update.apply_to(step);
                            }
                        }
                        self.env.ack(job).await;
                    }
                    Some(DispatchEvent::Completed(completion)) => break completion,
                    None => return Err(Halt::failed("dispatch channel closed")),
                },
                _ = cancel.cancelled(), if !cancel_sent => {
                    cancel_sent = true;
                    tracing::info!("Cancelling dispatched job {}", job.name);
                    dispatcher.cancel(dispatch_id).await;
                }
                _ = &mut deadline => {
                    tracing::warn!("Job {} sent no completion before its deadline", job.name);
                    return Err(Halt::failed("lost contact with executor"));
                }
            }
        };

        // Declared outputs are kept even when the job failed
        let declared = completion
            .outputs
            .iter()
            .filter(|(name, _)| job.outputs.iter().any(|o| &o.name == *name));
        self.env.task.global.set_outputs(&job.key, declared);

        match completion.status {
            Status::Passed => Ok(()),
            status => Err(Halt {
                status,
                error: completion.error,
            }),
        }
    }

    fn after_run(&self, job: &JobTask) {
        for step in job.steps() {
            if step.status == StepStatus::Passed {
                step_ctl(&step.spec).after_run(step, &self.env.task.global);
            }
        }
    }
}

#[async_trait]
impl JobCtl for FreestyleJobCtl {
    fn env(&self) -> &JobEnv {
        &self.env
    }

    async fn run(&self, job: &mut JobTask, cancel: &CancellationToken) {
        if let Err(halt) = self.prepare(job) {
            finish(job, Err(halt));
            return;
        }
        self.env.ack(job).await;

        let outcome = self.dispatch_and_wait(job, cancel).await;
        self.after_run(job);
        finish(job, outcome);
    }

    async fn clean(&self, _job: &JobTask) {
        let dispatch_id = self.dispatch_id.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(id) = dispatch_id {
            self.env.services.dispatcher.abandon(id).await;
        }
    }
}

// =============================================================================
// SQL
// =============================================================================

pub struct SqlJobCtl {
    env: JobEnv,
}

impl SqlJobCtl {
    async fn execute(&self, spec: &mut JobTaskSqlSpec, cancel: &CancellationToken) -> Outcome {
        if !matches!(spec.db_type, DbType::Mysql | DbType::Mariadb) {
            return Err(Halt::failed(ControllerError::InvalidDbType));
        }
        let instance = self
            .env
            .services
            .catalog
            .db_instance(&spec.db_instance_id)
            .await
            .map_err(Halt::failed)?
            .ok_or_else(|| {
                Halt::failed(ControllerError::NotFound {
                    kind: "database instance",
                    key: spec.db_instance_id.clone(),
                })
            })?;
        let mut session = self
            .env
            .services
            .sql
            .connect(&instance)
            .await
            .map_err(Halt::failed)?;

        spec.results = split_statements(&spec.sql)
            .into_iter()
            .map(|sql| SqlExecResult {
                sql,
                ..Default::default()
            })
            .collect();

        for result in spec.results.iter_mut() {
            if cancel.is_cancelled() {
                return Err(Halt::cancelled());
            }
            let started = Instant::now();
            let executed = session.execute(&result.sql).await;
            result.elapsed_time_ms = started.elapsed().as_millis() as i64;
            match executed {
                Ok(rows) => {
                    result.status = SqlExecStatus::Success;
                    result.rows_affected = rows;
                }
                Err(err) => {
                    result.status = SqlExecStatus::Failed;
                    return Err(Halt::failed(format!(
                        "exec SQL \"{}\" error: {}",
                        result.sql, err
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobCtl for SqlJobCtl {
    fn env(&self) -> &JobEnv {
        &self.env
    }

    async fn run(&self, job: &mut JobTask, cancel: &CancellationToken) {
        let outcome = match &mut job.spec {
            JobTaskSpec::Sql(spec) => self.execute(spec, cancel).await,
            _ => Err(Halt::failed("not a sql job")),
        };

        if let JobTaskSpec::Sql(spec) = &job.spec {
            let executed = spec
                .results
                .iter()
                .filter(|r| r.status != SqlExecStatus::NotExec)
                .count();
            let summary = format!("{} of {} statements executed", executed, spec.results.len());
            self.env.log(job, LogLevel::Info, summary).await;
        }
        finish(job, outcome);
    }
}

// =============================================================================
// Deploy
// =============================================================================

pub struct DeployJobCtl {
    env: JobEnv,
}

impl DeployJobCtl {
    fn request(&self, spec: &JobTaskDeploySpec, images: BTreeMap<String, String>) -> DeployRequest {
        DeployRequest {
            workflow_name: self.env.task.workflow_name.clone(),
            task_id: self.env.task.task_id,
            env: spec.env.clone(),
            namespace: spec.namespace.clone(),
            cluster_id: spec.cluster_id.clone(),
            production: spec.production,
            service_name: spec.service_name.clone(),
            images,
        }
    }

    async fn wait_ready(&self, req: &DeployRequest, timeout: Duration, cancel: &CancellationToken) -> Outcome {
        let deployer = &self.env.services.deployer;
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.env.services.deploy_poll_interval) => {
                    match deployer.is_ready(req).await {
                        Ok(true) => return Ok(()),
                        Ok(false) => tracing::debug!("Service {} not ready yet", req.service_name),
                        Err(e) => tracing::warn!("Readiness check of {} failed: {}", req.service_name, e),
                    }
                }
                _ = &mut deadline => {
                    return Err(Halt::with(
                        Status::Timeout,
                        format!("service {} did not become ready in time", req.service_name),
                    ));
                }
                _ = cancel.cancelled() => return Err(Halt::cancelled()),
            }
        }
    }

    async fn deploy(&self, job: &mut JobTask, cancel: &CancellationToken) -> Outcome {
        let JobTaskSpec::Deploy(spec) = &job.spec else {
            return Err(Halt::failed("not a deploy job"));
        };
        let spec = spec.clone();

        let mut images = BTreeMap::new();
        for module in &spec.modules {
            let image = self
                .env
                .task
                .global
                .render_strict(&module.image)
                .map_err(Halt::failed)?;
            if image.is_empty() {
                return Err(Halt::failed(format!(
                    "no image for module {}",
                    module.service_module
                )));
            }
            images.insert(module.service_module.clone(), image);
        }

        let req = self.request(&spec, images.clone());
        self.env
            .log(job, LogLevel::Info, format!("Deploying {} to {}", spec.service_name, spec.env))
            .await;
        tokio::select! {
            result = self.env.services.deployer.deploy(&req) => result.map_err(Halt::failed)?,
            _ = cancel.cancelled() => return Err(Halt::cancelled()),
        }

        if let JobTaskSpec::Deploy(spec) = &mut job.spec {
            spec.replace_images = images.clone();
        }
        self.env.ack(job).await;

        if !spec.skip_check_run_status {
            self.wait_ready(&req, minutes(job.timeout), cancel).await?;
        }

        for (module, image) in &images {
            let key = module_image_key(&job.origin_name, &spec.service_name, module);
            self.env.task.global.set(key, image.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl JobCtl for DeployJobCtl {
    fn env(&self) -> &JobEnv {
        &self.env
    }

    async fn run(&self, job: &mut JobTask, cancel: &CancellationToken) {
        let outcome = self.deploy(job, cancel).await;
        if let Err(halt) = &outcome {
            if let Some(error) = &halt.error {
                self.env.log(job, LogLevel::Error, error.clone()).await;
            }
        }
        finish(job, outcome);
    }
}

// =============================================================================
// Approval
// =============================================================================

pub struct ApprovalJobCtl {
    env: JobEnv,
}

#[async_trait]
impl JobCtl for ApprovalJobCtl {
    fn env(&self) -> &JobEnv {
        &self.env
    }

    async fn run(&self, job: &mut JobTask, cancel: &CancellationToken) {
        let spec: JobTaskApprovalSpec = match &job.spec {
            JobTaskSpec::Approval(spec) => spec.clone(),
            _ => return finish(job, Err(Halt::failed("not an approval job"))),
        };

        let key = DecisionKey::job(&self.env.task.workflow_name, self.env.task.task_id, &job.name);
        let mut waiter = self.env.services.decisions.open(key);
        job.status = Status::WaitingApprove;
        self.env.ack(job).await;
        let task = self.env.task.snapshot().await;
        self.env.services.notify.approval_requested(&task, &job.name);

        let poll = ApprovalPoll {
            approvers: &spec.approvers,
            needed: spec.needed_approvers,
            timeout: minutes(job.timeout),
        };
        let mut votes = Vec::new();
        let outcome = poll.run(&mut waiter, cancel, |vote| votes.push(vote.clone())).await;

        let rejected_by = votes.iter().find(|v| !v.approve).map(|v| v.user.clone());
        if let JobTaskSpec::Approval(spec) = &mut job.spec {
            spec.votes.extend(votes);
        }
        let outcome = match outcome {
            ApprovalOutcome::Approved => Ok(()),
            ApprovalOutcome::Rejected => Err(Halt::with(
                Status::Rejected,
                format!("rejected by {}", rejected_by.unwrap_or_default()),
            )),
            ApprovalOutcome::Timeout => Err(Halt::with(Status::Timeout, "approval timed out")),
            ApprovalOutcome::Cancelled => Err(Halt::cancelled()),
        };
        finish(job, outcome);
    }
}
