//! In-process stand-ins for the external collaborators of controllers

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use taskline_core::domain::catalog::{CatalogKind, DbInstance, DbType};
use taskline_core::domain::common::Output;
use taskline_core::domain::job::JobType;
use taskline_core::domain::status::{Status, StepStatus};
use taskline_core::domain::step::{StepScriptSpec, StepSpec, StepTask};
use taskline_core::domain::task::{JobTask, JobTaskFreestyleSpec, JobTaskSpec, StageTask, WorkflowTask};
use taskline_core::dto::dispatch::{DispatchCompletion, DispatchedJob, StepUpdate};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{ControllerError, ControllerServices, DeployRequest, Deployer, SqlConnector, SqlSession};
use crate::catalog::CatalogReader;
use crate::dispatch::{DispatchError, DispatchEvent, DispatchEvents, JobDispatcher};
use crate::repository::{Catalog, MemoryStore, TaskStore};
use crate::scheduler::{DecisionBoard, TaskHandle};
use crate::service::log::LogService;
use crate::service::notify::NotifyService;
use crate::service::notify::tests::RecordingNotifier;

use super::job::JobEnv;

// =============================================================================
// Dispatcher
// =============================================================================

/// What the fake executor does with a job, by job name
#[derive(Debug, Clone)]
pub enum Script {
    Pass(BTreeMap<String, String>),
    Fail(&'static str),
    /// Finishes after a delay with the given status
    After(Duration, Status),
    /// Never reports; only a cancel ends it
    Hang,
}

#[derive(Default)]
pub struct ScriptedDispatcher {
    scripts: Mutex<HashMap<String, Script>>,
    dispatched: Mutex<Vec<DispatchedJob>>,
    hanging: Mutex<HashMap<Uuid, mpsc::UnboundedSender<DispatchEvent>>>,
}

impl ScriptedDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, job_name: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_name.to_string(), script);
        self
    }

    pub fn dispatched(&self) -> Vec<String> {
        self.dispatched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|job| job.job_name.clone())
            .collect()
    }
}

fn step_events(job: &DispatchedJob, status: StepStatus) -> Vec<DispatchEvent> {
    job.steps
        .iter()
        .map(|step| {
            DispatchEvent::Step(StepUpdate {
                name: step.name.clone(),
                status,
                error: None,
                start_time: Some(Utc::now()),
                end_time: Some(Utc::now()),
            })
        })
        .collect()
}

fn completed(status: Status, error: Option<&str>, outputs: BTreeMap<String, String>) -> DispatchEvent {
    DispatchEvent::Completed(DispatchCompletion {
        status,
        error: error.map(str::to_string),
        outputs,
    })
}

#[async_trait]
impl JobDispatcher for ScriptedDispatcher {
    async fn dispatch(&self, job: DispatchedJob) -> Result<DispatchEvents, DispatchError> {
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job.job_name)
            .cloned()
            .unwrap_or(Script::Pass(BTreeMap::new()));
        self.dispatched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(job.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        match script {
            Script::Pass(outputs) => {
                for event in step_events(&job, StepStatus::Passed) {
                    let _ = tx.send(event);
                }
                let _ = tx.send(completed(Status::Passed, None, outputs));
            }
            Script::Fail(error) => {
                for event in step_events(&job, StepStatus::Failed) {
                    let _ = tx.send(event);
                }
                let outputs = BTreeMap::from([("PARTIAL".to_string(), "yes".to_string())]);
                let _ = tx.send(completed(Status::Failed, Some(error), outputs));
            }
            Script::After(delay, status) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(completed(status, None, BTreeMap::new()));
                });
            }
            Script::Hang => {
                self.hanging
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(job.dispatch_id, tx);
            }
        }
        Ok(rx)
    }

    async fn cancel(&self, dispatch_id: Uuid) {
        let sender = self
            .hanging
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&dispatch_id);
        if let Some(tx) = sender {
            let _ = tx.send(completed(Status::Cancelled, None, BTreeMap::new()));
        }
    }

    async fn abandon(&self, dispatch_id: Uuid) {
        self.hanging
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&dispatch_id);
    }
}

// =============================================================================
// SQL
// =============================================================================

#[derive(Default, Clone)]
pub struct FakeSql {
    pub fail_on: Option<&'static str>,
    pub executed: Arc<Mutex<Vec<String>>>,
}

struct FakeSession {
    fail_on: Option<&'static str>,
    executed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SqlSession for FakeSession {
    async fn execute(&mut self, statement: &str) -> Result<u64, String> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(statement.to_string());
        match self.fail_on {
            Some(marker) if statement.contains(marker) => {
                Err(format!("Table '{}' doesn't exist", marker))
            }
            _ => Ok(1),
        }
    }
}

#[async_trait]
impl SqlConnector for FakeSql {
    async fn connect(&self, _instance: &DbInstance) -> Result<Box<dyn SqlSession>, ControllerError> {
        Ok(Box::new(FakeSession {
            fail_on: self.fail_on,
            executed: self.executed.clone(),
        }))
    }
}

// =============================================================================
// Deployer
// =============================================================================

#[derive(Default)]
pub struct FakeDeployer {
    /// Readiness polls answered with false before answering true;
    /// `None` never becomes ready
    pub ready_after: Option<usize>,
    pub polls: AtomicUsize,
    pub requests: Mutex<Vec<DeployRequest>>,
}

impl FakeDeployer {
    pub fn ready_after(polls: usize) -> Self {
        Self {
            ready_after: Some(polls),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Deployer for FakeDeployer {
    async fn deploy(&self, req: &DeployRequest) -> Result<(), ControllerError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(req.clone());
        Ok(())
    }

    async fn is_ready(&self, _req: &DeployRequest) -> Result<bool, ControllerError> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.ready_after.is_some_and(|after| poll >= after))
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn shell_job(name: &str) -> JobTask {
    let mut step = StepTask::new(
        format!("{}-shell", name),
        StepSpec::Shell(StepScriptSpec {
            script: "make".to_string(),
            skip_prepare: false,
        }),
    );
    step.job_name = name.to_string();
    step.job_key = name.to_string();
    let mut job = JobTask::new(
        name,
        name,
        JobType::Freestyle,
        JobTaskSpec::Freestyle(JobTaskFreestyleSpec {
            properties: Default::default(),
            steps: vec![step],
        }),
    );
    job.origin_name = name.to_string();
    job.timeout = 60;
    job.outputs = vec![Output::named("VERSION"), Output::named("PARTIAL")];
    job
}

pub fn task_with(stages: Vec<Vec<JobTask>>) -> WorkflowTask {
    WorkflowTask {
        workflow_name: "release".to_string(),
        workflow_display_name: "Release".to_string(),
        project: "shop".to_string(),
        task_id: 1,
        status: Status::Created,
        stages: stages
            .into_iter()
            .enumerate()
            .map(|(i, jobs)| StageTask {
                name: format!("stage-{}", i + 1),
                parallel: true,
                concurrency: None,
                status: Status::Created,
                jobs,
                start_time: None,
                end_time: None,
            })
            .collect(),
        global_context: BTreeMap::new(),
        creator: "amy".to_string(),
        origin_args: None,
        approval: None,
        notify_ctls: Vec::new(),
        error: None,
        create_time: Utc::now(),
        start_time: None,
        end_time: None,
    }
}

pub struct Fakes {
    pub store: Arc<MemoryStore>,
    pub dispatcher: Arc<ScriptedDispatcher>,
    pub sql: FakeSql,
    pub deployer: Arc<FakeDeployer>,
    pub decisions: DecisionBoard,
    pub notifier: Arc<RecordingNotifier>,
}

impl Fakes {
    pub fn new(dispatcher: ScriptedDispatcher) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            dispatcher: Arc::new(dispatcher),
            sql: FakeSql::default(),
            deployer: Arc::new(FakeDeployer::ready_after(0)),
            decisions: DecisionBoard::new(),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    pub async fn services(&self) -> Arc<ControllerServices> {
        let instance = DbInstance {
            id: "mysql-prod".to_string(),
            name: "orders".to_string(),
            db_type: DbType::Mysql,
            host: "db.internal".to_string(),
            port: 3306,
            username: "deploy".to_string(),
            password: String::new(),
        };
        self.store
            .upsert_record(
                CatalogKind::DbInstance,
                "mysql-prod",
                serde_json::to_value(&instance).unwrap(),
            )
            .await
            .unwrap();
        Arc::new(ControllerServices {
            catalog: CatalogReader::new(self.store.clone()),
            job_infos: self.store.clone(),
            logs: LogService::new(self.store.clone()),
            dispatcher: self.dispatcher.clone(),
            sql: Arc::new(self.sql.clone()),
            deployer: self.deployer.clone(),
            decisions: self.decisions.clone(),
            notify: NotifyService::new(self.notifier.clone(), self.store.clone()),
            dispatch_grace: Duration::from_secs(5),
            deploy_poll_interval: Duration::from_millis(10),
        })
    }

    /// Persists the task and builds the environment its jobs run in
    pub async fn env(&self, task: WorkflowTask) -> JobEnv {
        self.store.create_task(&task).await.unwrap();
        JobEnv {
            task: Arc::new(TaskHandle::new(task, self.store.clone())),
            services: self.services().await,
        }
    }
}
