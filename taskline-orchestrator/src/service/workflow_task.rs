//! Workflow Task Service
//!
//! Saving workflow definitions, triggering them into tasks, and every
//! operator action on a running task: cancel, approve, manual decisions.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use taskline_core::domain::status::Status;
use taskline_core::domain::task::{JobTaskSpec, WorkflowTask};
use taskline_core::domain::workflow::WorkflowDefinition;
use taskline_core::dto::task::{
    ApproveRequest, CreateTask, CreateTaskResponse, DecisionRequest, TaskSummary,
};
use taskline_core::output::workflow_key;

use crate::compiler::{CompileError, JobCompiler};
use crate::cron::TaskTrigger;
use crate::repository::{StoreError, TaskStore, WorkflowStore};
use crate::scheduler::decision::vote;
use crate::scheduler::{Decision, DecisionBoard, DecisionError, DecisionKey, TaskScheduler};
use crate::service::cronjob::{CronjobError, CronjobService};

const DEFAULT_CREATOR: &str = "system";
const RESTART_ERROR: &str = "interrupted by orchestrator restart";

#[derive(Debug, thiserror::Error)]
pub enum WorkflowTaskError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    ValidationError(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Cronjob(#[from] CronjobError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<DecisionError> for WorkflowTaskError {
    fn from(err: DecisionError) -> Self {
        WorkflowTaskError::Conflict(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WorkflowTaskError>;

#[derive(Clone)]
pub struct WorkflowTaskService {
    workflows: Arc<dyn WorkflowStore>,
    tasks: Arc<dyn TaskStore>,
    compiler: JobCompiler,
    cronjobs: CronjobService,
    scheduler: Arc<TaskScheduler>,
    decisions: DecisionBoard,
}

impl WorkflowTaskService {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        tasks: Arc<dyn TaskStore>,
        compiler: JobCompiler,
        cronjobs: CronjobService,
        scheduler: Arc<TaskScheduler>,
        decisions: DecisionBoard,
    ) -> Self {
        Self {
            workflows,
            tasks,
            compiler,
            cronjobs,
            scheduler,
            decisions,
        }
    }

    // =========================================================================
    // Definitions
    // =========================================================================

    /// Validates and stores a workflow definition, then reconciles its
    /// schedules
    pub async fn save_workflow(&self, mut workflow: WorkflowDefinition) -> Result<WorkflowDefinition> {
        if workflow.name.trim().is_empty() {
            return Err(WorkflowTaskError::ValidationError(
                "workflow name cannot be empty".to_string(),
            ));
        }
        for job in workflow.jobs_mut() {
            self.compiler.instantiate(job)?;
        }
        let mut names = HashSet::new();
        for job in workflow.jobs() {
            if !names.insert(job.name.as_str()) {
                return Err(WorkflowTaskError::ValidationError(format!(
                    "duplicate job name {}",
                    job.name
                )));
            }
            self.compiler.lint_job(job, &workflow)?;
        }

        self.cronjobs.handle_cronjob(&mut workflow).await?;
        workflow.updated_at = Some(Utc::now());
        self.workflows.save_workflow(&workflow).await?;
        tracing::info!("Workflow saved: {}", workflow.name);
        Ok(workflow)
    }

    pub async fn get_workflow(&self, name: &str) -> Result<WorkflowDefinition> {
        self.workflows
            .find_workflow(name)
            .await?
            .ok_or_else(|| WorkflowTaskError::NotFound(format!("workflow {} not found", name)))
    }

    /// The definition as a trigger form presents it: selections resolved
    /// against the catalog and option pools filled
    pub async fn preset(&self, name: &str) -> Result<WorkflowDefinition> {
        let stored = self.get_workflow(name).await?;
        let mut preset = stored.clone();
        let snapshot = preset.clone();
        for job in preset.jobs_mut() {
            self.compiler.set_preset(job, &snapshot).await?;
            self.compiler.set_options(job, &snapshot, &stored).await?;
        }
        Ok(preset)
    }

    /// Reconciles previously used trigger arguments with the latest
    /// definition; jobs no longer in the definition are dropped
    pub async fn refresh_args(&self, name: &str, mut args: WorkflowDefinition) -> Result<WorkflowDefinition> {
        let latest = self.get_workflow(name).await?;
        for stage in args.stages.iter_mut() {
            stage
                .jobs
                .retain(|job| latest.jobs().any(|l| l.name == job.name && l.job_type() == job.job_type()));
        }
        for job in args.jobs_mut() {
            self.compiler.update_with_latest_setting(job, &latest).await?;
        }
        Ok(args)
    }

    /// Placeholders of every output a job publishes
    pub async fn job_outputs(&self, name: &str, job_name: &str) -> Result<Vec<String>> {
        let workflow = self.get_workflow(name).await?;
        let job = workflow.find_job(job_name).ok_or_else(|| {
            WorkflowTaskError::NotFound(format!("job {} not found in workflow {}", job_name, name))
        })?;
        Ok(self.compiler.get_outputs(job, &workflow).await?)
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    /// Compiles the workflow with the trigger's arguments and starts it
    pub async fn create_task(&self, name: &str, req: CreateTask) -> Result<CreateTaskResponse> {
        let mut workflow = self.get_workflow(name).await?;
        if let Some(args) = &req.args {
            for job in workflow.jobs_mut() {
                if let Some(overlay) = args.find_job(&job.name) {
                    self.compiler.merge_args(job, overlay)?;
                }
            }
        }

        let task_id = self.tasks.next_task_id(name).await?;
        let stages = self.compiler.compile_workflow(&workflow, task_id).await?;

        let creator = req
            .creator
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CREATOR.to_string());
        let mut global_context = BTreeMap::from([
            (workflow_key("name"), workflow.name.clone()),
            (workflow_key("project"), workflow.project.clone()),
            (workflow_key("task.id"), task_id.to_string()),
            (workflow_key("task.creator"), creator.clone()),
        ]);
        for (input, value) in &req.inputs {
            global_context.insert(workflow_key(&format!("input.{}", input)), value.clone());
        }

        let task = WorkflowTask {
            workflow_name: workflow.name.clone(),
            workflow_display_name: workflow.display_name().to_string(),
            project: workflow.project.clone(),
            task_id,
            status: Status::Created,
            stages,
            global_context,
            creator,
            origin_args: req.args,
            approval: workflow.approval.clone(),
            notify_ctls: workflow.notify_ctls.clone(),
            error: None,
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
        };
        self.tasks.create_task(&task).await?;
        tracing::info!("Task {}#{} created by {}", task.workflow_name, task_id, task.creator);
        self.scheduler.start(task);

        Ok(CreateTaskResponse {
            workflow_name: name.to_string(),
            task_id,
        })
    }

    pub async fn get_task(&self, name: &str, task_id: i64) -> Result<WorkflowTask> {
        self.tasks
            .find_task(name, task_id)
            .await?
            .ok_or_else(|| WorkflowTaskError::NotFound(format!("task {}#{} not found", name, task_id)))
    }

    pub async fn list_tasks(&self, name: &str, limit: i64) -> Result<Vec<TaskSummary>> {
        let tasks = self.tasks.list_tasks(name, limit).await?;
        Ok(tasks.iter().map(TaskSummary::from).collect())
    }

    pub async fn cancel_task(&self, name: &str, task_id: i64) -> Result<()> {
        if self.scheduler.cancels().cancel(name, task_id) {
            tracing::info!("Cancel requested for task {}#{}", name, task_id);
            return Ok(());
        }
        let task = self.get_task(name, task_id).await?;
        Err(WorkflowTaskError::Conflict(format!(
            "task {}#{} is not running ({})",
            name, task_id, task.status
        )))
    }

    /// Votes on the workflow approval gate
    pub async fn approve_task(&self, name: &str, task_id: i64, req: ApproveRequest) -> Result<()> {
        let task = self.get_task(name, task_id).await?;
        let approvers = task
            .approval
            .as_ref()
            .filter(|gate| gate.enabled)
            .map(|gate| gate.approvers.clone())
            .ok_or_else(|| {
                WorkflowTaskError::Conflict(format!("task {}#{} has no approval gate", name, task_id))
            })?;
        check_approver(&approvers, &req.user)?;
        self.decisions.submit(
            &DecisionKey::workflow(name, task_id),
            vote(&req.user, req.approve, &req.comment),
        )?;
        Ok(())
    }

    /// Votes on an approval job
    pub async fn approve_job(
        &self,
        name: &str,
        task_id: i64,
        job_name: &str,
        req: ApproveRequest,
    ) -> Result<()> {
        let task = self.get_task(name, task_id).await?;
        let job = task.find_job(job_name).ok_or_else(|| {
            WorkflowTaskError::NotFound(format!("job {} not found in task {}#{}", job_name, name, task_id))
        })?;
        let JobTaskSpec::Approval(spec) = &job.spec else {
            return Err(WorkflowTaskError::ValidationError(format!(
                "job {} is not an approval job",
                job_name
            )));
        };
        check_approver(&spec.approvers, &req.user)?;
        self.decisions.submit(
            &DecisionKey::job(name, task_id, job_name),
            vote(&req.user, req.approve, &req.comment),
        )?;
        Ok(())
    }

    /// Resolves a job paused for a manual check
    pub async fn decide_job(
        &self,
        name: &str,
        task_id: i64,
        job_name: &str,
        req: DecisionRequest,
    ) -> Result<()> {
        let task = self.get_task(name, task_id).await?;
        let job = task.find_job(job_name).ok_or_else(|| {
            WorkflowTaskError::NotFound(format!("job {} not found in task {}#{}", job_name, name, task_id))
        })?;
        if job.status != Status::ManualCheck {
            return Err(WorkflowTaskError::Conflict(format!(
                "job {} is not waiting for a manual check",
                job_name
            )));
        }
        self.decisions.submit(
            &DecisionKey::job(name, task_id, job_name),
            Decision::Manual {
                user: req.user,
                decision: req.decision,
            },
        )?;
        Ok(())
    }

    /// Fails every task a previous orchestrator process left unfinished
    pub async fn recover_unfinished(&self) -> Result<usize> {
        let tasks = self.tasks.list_unfinished_tasks().await?;
        let count = tasks.len();
        for mut task in tasks {
            for stage in task.stages.iter_mut() {
                for job in stage.jobs.iter_mut().filter(|j| !j.status.is_terminal()) {
                    job.finish(Status::Failed, Some(RESTART_ERROR.to_string()));
                }
                if !stage.status.is_terminal() {
                    stage.status = Status::Failed;
                }
            }
            task.status = Status::Failed;
            task.error = Some(RESTART_ERROR.to_string());
            task.end_time = Some(Utc::now());
            self.tasks.update_task(&task).await?;
            tracing::warn!("Task {}#{} {}", task.workflow_name, task.task_id, RESTART_ERROR);
        }
        Ok(count)
    }
}

fn check_approver(approvers: &[String], user: &str) -> Result<()> {
    if user.trim().is_empty() {
        return Err(WorkflowTaskError::ValidationError("user cannot be empty".to_string()));
    }
    if !approvers.is_empty() && !approvers.iter().any(|a| a == user) {
        return Err(WorkflowTaskError::Forbidden(format!("{} is not an approver", user)));
    }
    Ok(())
}

#[async_trait]
impl TaskTrigger for WorkflowTaskService {
    async fn trigger(
        &self,
        workflow_name: &str,
        args: Option<WorkflowDefinition>,
        creator: &str,
    ) -> Result<i64> {
        let req = CreateTask {
            args,
            creator: Some(creator.to_string()),
            inputs: BTreeMap::new(),
        };
        Ok(self.create_task(workflow_name, req).await?.task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use taskline_core::domain::job::{ApprovalJobSpec, FreestyleJobSpec, JobSpec};
    use taskline_core::domain::workflow::{Job, Stage};

    use crate::compiler::CompilerSettings;
    use crate::controller::fakes::{Fakes, Script, ScriptedDispatcher, shell_job, task_with};
    use crate::scheduler::CancelRegistry;
    use crate::service::notify::NotifyService;
    use crate::service::notify::tests::RecordingNotifier;

    async fn service(fakes: &Fakes) -> WorkflowTaskService {
        let services = fakes.services().await;
        let notify = NotifyService::new(Arc::new(RecordingNotifier::default()), fakes.store.clone());
        let scheduler = Arc::new(TaskScheduler::new(
            services.clone(),
            fakes.store.clone(),
            CancelRegistry::new(),
            notify,
            Duration::from_secs(1),
        ));
        WorkflowTaskService::new(
            fakes.store.clone(),
            fakes.store.clone(),
            JobCompiler::new(services.catalog.clone(), CompilerSettings::default()),
            CronjobService::new(fakes.store.clone(), fakes.store.clone()),
            scheduler,
            fakes.decisions.clone(),
        )
    }

    fn workflow(jobs: Vec<Job>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "release".to_string(),
            project: "shop".to_string(),
            stages: vec![Stage {
                name: "build".to_string(),
                jobs,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn freestyle(name: &str) -> Job {
        Job::new(name, JobSpec::Freestyle(FreestyleJobSpec::default()))
    }

    async fn wait_finished(service: &WorkflowTaskService, task_id: i64) -> WorkflowTask {
        loop {
            let task = service.get_task("release", task_id).await.unwrap();
            if task.status.is_terminal() {
                return task;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_save_rejects_bad_job_name() {
        let fakes = Fakes::new(ScriptedDispatcher::new());
        let service = service(&fakes).await;

        let result = service.save_workflow(workflow(vec![freestyle("Build_1")])).await;
        assert!(matches!(result, Err(WorkflowTaskError::Compile(CompileError::InvalidJobName(_)))));
    }

    #[tokio::test]
    async fn test_save_rejects_duplicate_job_names() {
        let fakes = Fakes::new(ScriptedDispatcher::new());
        let service = service(&fakes).await;

        let result = service
            .save_workflow(workflow(vec![freestyle("lint"), freestyle("lint")]))
            .await;
        assert!(matches!(result, Err(WorkflowTaskError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_task_ids_increase() {
        let fakes = Fakes::new(ScriptedDispatcher::new());
        let service = service(&fakes).await;
        service.save_workflow(workflow(vec![freestyle("lint")])).await.unwrap();

        let first = service.create_task("release", CreateTask::default()).await.unwrap();
        let second = service.create_task("release", CreateTask::default()).await.unwrap();
        assert!(second.task_id > first.task_id);

        let task = wait_finished(&service, first.task_id).await;
        assert_eq!(task.status, Status::Passed);
        assert_eq!(task.creator, DEFAULT_CREATOR);
        assert_eq!(task.global_context["workflow.task.id"], first.task_id.to_string());
    }

    #[tokio::test]
    async fn test_inputs_seed_global_context() {
        let fakes = Fakes::new(ScriptedDispatcher::new());
        let service = service(&fakes).await;
        service.save_workflow(workflow(vec![freestyle("lint")])).await.unwrap();

        let req = CreateTask {
            inputs: BTreeMap::from([("BRANCH".to_string(), "main".to_string())]),
            creator: Some("amy".to_string()),
            ..Default::default()
        };
        let created = service.create_task("release", req).await.unwrap();

        let task = wait_finished(&service, created.task_id).await;
        assert_eq!(task.global_context["workflow.input.BRANCH"], "main");
        assert_eq!(task.creator, "amy");
    }

    #[tokio::test]
    async fn test_unknown_workflow() {
        let fakes = Fakes::new(ScriptedDispatcher::new());
        let service = service(&fakes).await;

        let result = service.create_task("missing", CreateTask::default()).await;
        assert!(matches!(result, Err(WorkflowTaskError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_approve_job_checks_approvers() {
        let fakes = Fakes::new(ScriptedDispatcher::new());
        let service = service(&fakes).await;
        let approval = Job::new(
            "sign-off",
            JobSpec::Approval(ApprovalJobSpec {
                approvers: vec!["bo".to_string()],
                needed_approvers: 1,
                ..Default::default()
            }),
        );
        service.save_workflow(workflow(vec![approval])).await.unwrap();
        let created = service.create_task("release", CreateTask::default()).await.unwrap();

        let key = DecisionKey::job("release", created.task_id, "sign-off");
        while !fakes.decisions.is_waiting(&key) {
            tokio::task::yield_now().await;
        }

        let intruder = ApproveRequest {
            user: "eve".to_string(),
            approve: true,
            comment: String::new(),
        };
        let result = service
            .approve_job("release", created.task_id, "sign-off", intruder)
            .await;
        assert!(matches!(result, Err(WorkflowTaskError::Forbidden(_))));

        let approver = ApproveRequest {
            user: "bo".to_string(),
            approve: true,
            comment: "ok".to_string(),
        };
        service
            .approve_job("release", created.task_id, "sign-off", approver)
            .await
            .unwrap();

        let task = wait_finished(&service, created.task_id).await;
        assert_eq!(task.status, Status::Passed);
    }

    #[tokio::test]
    async fn test_cancel_finished_task_conflicts() {
        let fakes = Fakes::new(ScriptedDispatcher::new());
        let service = service(&fakes).await;
        service.save_workflow(workflow(vec![freestyle("lint")])).await.unwrap();
        let created = service.create_task("release", CreateTask::default()).await.unwrap();
        wait_finished(&service, created.task_id).await;
        while service.scheduler.cancels().is_running("release", created.task_id) {
            tokio::task::yield_now().await;
        }

        let result = service.cancel_task("release", created.task_id).await;
        assert!(matches!(result, Err(WorkflowTaskError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_recover_fails_unfinished_tasks() {
        let fakes = Fakes::new(ScriptedDispatcher::new().script("build", Script::Hang));
        let service = service(&fakes).await;
        let mut task = task_with(vec![vec![shell_job("build")]]);
        task.status = Status::Running;
        task.stages[0].jobs[0].status = Status::Running;
        fakes.store.create_task(&task).await.unwrap();

        assert_eq!(service.recover_unfinished().await.unwrap(), 1);

        let task = service.get_task("release", 1).await.unwrap();
        assert_eq!(task.status, Status::Failed);
        assert_eq!(task.error.as_deref(), Some(RESTART_ERROR));
        assert_eq!(task.stages[0].jobs[0].status, Status::Failed);
    }
}
