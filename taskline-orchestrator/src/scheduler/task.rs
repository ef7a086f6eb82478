//! Task scheduler
//!
//! A task passes an optional approval gate, then runs its stages strictly
//! one after another. Inside a stage jobs take a semaphore permit in
//! declaration order; once the stage's stop token trips, jobs still
//! waiting for a permit are cancelled without running while running jobs
//! are left to finish.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use taskline_core::domain::status::Status;
use taskline_core::domain::task::{JobTask, WorkflowTask};
use taskline_core::domain::workflow::{ApprovalGate, ErrorPolicy};
use taskline_core::dto::task::ManualDecision;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::decision::{ApprovalOutcome, ApprovalPoll, Decision, DecisionKey};
use super::{CancelRegistry, TaskHandle};
use crate::controller::ControllerServices;
use crate::controller::job::{JobEnv, run_job};
use crate::repository::TaskStore;
use crate::service::notify::NotifyService;

const DEFAULT_GATE_TIMEOUT_MINUTES: u64 = 60;

pub struct TaskScheduler {
    services: Arc<ControllerServices>,
    tasks: Arc<dyn TaskStore>,
    cancels: CancelRegistry,
    notify: NotifyService,
    cancel_grace: Duration,
}

/// Final status of a task or stage with the reason it did not pass
struct Verdict {
    status: Status,
    error: Option<String>,
}

impl Verdict {
    fn passed() -> Self {
        Self {
            status: Status::Passed,
            error: None,
        }
    }

    fn new(status: Status, error: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(error.into()),
        }
    }
}

impl TaskScheduler {
    pub fn new(
        services: Arc<ControllerServices>,
        tasks: Arc<dyn TaskStore>,
        cancels: CancelRegistry,
        notify: NotifyService,
        cancel_grace: Duration,
    ) -> Self {
        Self {
            services,
            tasks,
            cancels,
            notify,
            cancel_grace,
        }
    }

    pub fn cancels(&self) -> &CancelRegistry {
        &self.cancels
    }

    /// Starts a persisted task in the background
    pub fn start(self: &Arc<Self>, task: WorkflowTask) -> tokio::task::JoinHandle<WorkflowTask> {
        let cancel = self.cancels.register(&task.workflow_name, task.task_id);
        let this = self.clone();
        tokio::spawn(async move { this.run(task, cancel).await })
    }

    /// Runs a task to a terminal status and returns its final document
    pub async fn run(&self, task: WorkflowTask, cancel: CancellationToken) -> WorkflowTask {
        let handle = Arc::new(TaskHandle::new(task, self.tasks.clone()));
        let env = JobEnv {
            task: handle.clone(),
            services: self.services.clone(),
        };
        tracing::info!("Task {}#{} started", handle.workflow_name, handle.task_id);

        let verdict = self.drive(&env, &cancel).await;

        handle
            .update(|t| {
                t.status = verdict.status;
                t.error = verdict.error.clone();
                t.end_time = Some(Utc::now());
            })
            .await;
        let finished = handle.snapshot().await;
        self.notify.status_changed(&finished);

        self.cancels.remove(&handle.workflow_name, handle.task_id);
        self.services.logs.close_task(&handle.workflow_name, handle.task_id);
        tracing::info!(
            "Task {}#{} finished with {}",
            handle.workflow_name,
            handle.task_id,
            finished.status
        );
        finished
    }

    async fn set_status(&self, handle: &TaskHandle, status: Status) {
        handle
            .update(|t| {
                t.status = status;
                if status == Status::Running && t.start_time.is_none() {
                    t.start_time = Some(Utc::now());
                }
            })
            .await;
        self.notify.status_changed(&handle.snapshot().await);
    }

    async fn drive(&self, env: &JobEnv, cancel: &CancellationToken) -> Verdict {
        let handle = &env.task;
        let document = handle.snapshot().await;

        if let Some(gate) = document.approval.filter(|gate| gate.enabled) {
            if let Err(verdict) = self.pass_gate(handle, &gate, cancel).await {
                self.close_stages(handle, 0, Status::Skipped).await;
                return verdict;
            }
        }

        self.set_status(handle, Status::Running).await;

        let mut verdict = Verdict::passed();
        for index in 0..document.stages.len() {
            if cancel.is_cancelled() {
                self.close_stages(handle, index, Status::Cancelled).await;
                return Verdict {
                    status: Status::Cancelled,
                    error: None,
                };
            }
            let stage = self.run_stage(env, index, cancel).await;
            if stage.status != Status::Passed {
                let later = if stage.status == Status::Cancelled {
                    Status::Cancelled
                } else {
                    Status::Skipped
                };
                self.close_stages(handle, index + 1, later).await;
                verdict = stage;
                break;
            }
        }
        verdict
    }

    /// Waits on the workflow approval gate
    async fn pass_gate(
        &self,
        handle: &TaskHandle,
        gate: &ApprovalGate,
        cancel: &CancellationToken,
    ) -> Result<(), Verdict> {
        let key = DecisionKey::workflow(&handle.workflow_name, handle.task_id);
        let mut waiter = self.services.decisions.open(key);
        self.set_status(handle, Status::WaitingApprove).await;

        let minutes = if gate.timeout == 0 {
            DEFAULT_GATE_TIMEOUT_MINUTES
        } else {
            gate.timeout
        };
        let poll = ApprovalPoll {
            approvers: &gate.approvers,
            needed: gate.needed_approvers,
            timeout: Duration::from_secs(minutes * 60),
        };
        let mut rejected_by = None;
        let outcome = poll
            .run(&mut waiter, cancel, |vote| {
                tracing::info!(
                    "{} voted {} on {}#{}",
                    vote.user,
                    if vote.approve { "approve" } else { "reject" },
                    handle.workflow_name,
                    handle.task_id
                );
                if !vote.approve {
                    rejected_by = Some(vote.user.clone());
                }
            })
            .await;

        match outcome {
            ApprovalOutcome::Approved => Ok(()),
            ApprovalOutcome::Rejected => Err(Verdict::new(
                Status::Rejected,
                format!("rejected by {}", rejected_by.unwrap_or_default()),
            )),
            ApprovalOutcome::Timeout => Err(Verdict::new(Status::Timeout, "approval timed out")),
            ApprovalOutcome::Cancelled => Err(Verdict {
                status: Status::Cancelled,
                error: None,
            }),
        }
    }

    /// Marks stages from `from` on, and their jobs, with a status they
    /// never ran to
    async fn close_stages(&self, handle: &TaskHandle, from: usize, status: Status) {
        handle
            .update(|t| {
                for stage in t.stages.iter_mut().skip(from) {
                    stage.status = status;
                    for job in stage.jobs.iter_mut().filter(|j| !j.status.is_terminal()) {
                        job.status = status;
                    }
                }
            })
            .await;
    }

    async fn run_stage(&self, env: &JobEnv, index: usize, cancel: &CancellationToken) -> Verdict {
        let handle = &env.task;
        let Some(stage) = handle.snapshot().await.stages.get(index).cloned() else {
            return Verdict::passed();
        };
        handle
            .update(|t| {
                if let Some(s) = t.stages.get_mut(index) {
                    s.status = Status::Running;
                    s.start_time = Some(Utc::now());
                }
            })
            .await;
        tracing::info!("Stage {} of {}#{} started", stage.name, handle.workflow_name, handle.task_id);

        let permits = Arc::new(Semaphore::new(stage.effective_concurrency()));
        let stop = cancel.child_token();
        let tripped: Arc<Mutex<Option<Status>>> = Arc::new(Mutex::new(None));
        let mut running = JoinSet::new();

        for mut job in stage.jobs {
            let permit = tokio::select! {
                biased;
                _ = stop.cancelled() => None,
                permit = permits.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                job.finish(Status::Cancelled, None);
                env.ack(&job).await;
                continue;
            };

            let env = env.clone();
            let cancel = cancel.clone();
            let stop = stop.clone();
            let tripped = tripped.clone();
            running.spawn(async move {
                let job = run_job(env.clone(), job, cancel.clone()).await;
                let _permit = permit;
                if let Some(status) = settle(&env, job, &cancel).await {
                    tripped
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get_or_insert(status);
                    stop.cancel();
                }
            });
        }

        let stragglers = tokio::select! {
            _ = drain(&mut running) => false,
            _ = grace_expired(cancel, self.cancel_grace) => true,
        };
        if stragglers {
            tracing::warn!(
                "Aborting jobs of stage {} still running after the cancel grace period",
                stage.name
            );
            running.abort_all();
            drain(&mut running).await;
        }

        let tripped = *tripped.lock().unwrap_or_else(PoisonError::into_inner);
        let verdict = if cancel.is_cancelled() {
            Verdict {
                status: Status::Cancelled,
                error: None,
            }
        } else if let Some(status) = tripped {
            Verdict::new(status, format!("stage {} {}", stage.name, status))
        } else {
            Verdict::passed()
        };

        let lost = if cancel.is_cancelled() {
            Status::Cancelled
        } else {
            Status::Failed
        };
        let stage_status = verdict.status;
        handle
            .update(|t| {
                if let Some(s) = t.stages.get_mut(index) {
                    for job in s.jobs.iter_mut().filter(|j| !j.status.is_terminal()) {
                        job.finish(lost, None);
                    }
                    s.status = stage_status;
                    s.end_time = Some(Utc::now());
                }
            })
            .await;
        tracing::info!(
            "Stage {} of {}#{} finished with {}",
            stage.name,
            handle.workflow_name,
            handle.task_id,
            stage_status
        );
        verdict
    }
}

/// Applies the job's error policy; returns the status that stops the
/// stage, if any
async fn settle(env: &JobEnv, mut job: JobTask, cancel: &CancellationToken) -> Option<Status> {
    let failed = job.status;
    if !failed.is_failure() {
        return None;
    }
    match job.error_policy {
        ErrorPolicy::Stop => Some(failed),
        ErrorPolicy::Ignore => {
            tracing::info!("Ignoring {} of job {}", failed, job.name);
            None
        }
        ErrorPolicy::ManualCheck => {
            let key = DecisionKey::job(&env.task.workflow_name, env.task.task_id, &job.name);
            let mut waiter = env.services.decisions.open(key);
            job.status = Status::ManualCheck;
            env.ack(&job).await;

            let decision = loop {
                tokio::select! {
                    decision = waiter.next() => match decision {
                        Some(Decision::Manual { user, decision }) => {
                            tracing::info!("{} decided {:?} for job {}", user, decision, job.name);
                            break Some(decision);
                        }
                        Some(Decision::Vote(_)) => continue,
                        None => break None,
                    },
                    _ = cancel.cancelled() => break None,
                }
            };

            job.status = failed;
            env.ack(&job).await;
            match decision {
                Some(ManualDecision::Continue) => None,
                Some(ManualDecision::Abort) | None => Some(failed),
            }
        }
    }
}

async fn drain(running: &mut JoinSet<()>) {
    while let Some(joined) = running.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                tracing::error!("Job task panicked: {}", e);
            }
        }
    }
}

async fn grace_expired(cancel: &CancellationToken, grace: Duration) {
    cancel.cancelled().await;
    tokio::time::sleep(grace).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use taskline_core::domain::task::StageTask;

    use crate::controller::fakes::{Fakes, Script, ScriptedDispatcher, shell_job, task_with};
    use crate::scheduler::decision::vote;
    use crate::service::notify::tests::RecordingNotifier;

    async fn scheduler(fakes: &Fakes) -> Arc<TaskScheduler> {
        let notify = NotifyService::new(Arc::new(RecordingNotifier::default()), fakes.store.clone());
        Arc::new(TaskScheduler::new(
            fakes.services().await,
            fakes.store.clone(),
            CancelRegistry::new(),
            notify,
            Duration::from_secs(1),
        ))
    }

    async fn start(fakes: &Fakes, task: WorkflowTask) -> (Arc<TaskScheduler>, tokio::task::JoinHandle<WorkflowTask>) {
        fakes.store.create_task(&task).await.unwrap();
        let scheduler = scheduler(fakes).await;
        let running = scheduler.start(task);
        (scheduler, running)
    }

    fn statuses(stage: &StageTask) -> Vec<Status> {
        stage.jobs.iter().map(|j| j.status).collect()
    }

    fn limited(mut task: WorkflowTask, concurrency: usize) -> WorkflowTask {
        for stage in task.stages.iter_mut() {
            stage.concurrency = Some(concurrency);
        }
        task
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_policy_cancels_waiting_jobs() {
        let fakes = Fakes::new(
            ScriptedDispatcher::new()
                .script("a", Script::Fail("exit status 1"))
                .script("b", Script::After(Duration::from_secs(30), Status::Passed))
                .script("c", Script::Pass(BTreeMap::new())),
        );
        let task = limited(
            task_with(vec![
                vec![shell_job("a"), shell_job("b"), shell_job("c")],
                vec![shell_job("d")],
            ]),
            2,
        );

        let (_, running) = start(&fakes, task).await;
        let task = running.await.unwrap();

        assert_eq!(task.status, Status::Failed);
        assert_eq!(task.stages[0].status, Status::Failed);
        assert_eq!(
            statuses(&task.stages[0]),
            vec![Status::Failed, Status::Passed, Status::Cancelled]
        );
        assert_eq!(task.stages[1].status, Status::Skipped);
        assert_eq!(fakes.dispatcher.dispatched(), vec!["a", "b"]);

        let stored = fakes.store.find_task("release", 1).await.unwrap().unwrap();
        assert_eq!(stored, task);
    }

    #[tokio::test]
    async fn test_ignore_policy_keeps_going() {
        let fakes = Fakes::new(ScriptedDispatcher::new().script("a", Script::Fail("exit status 1")));
        let mut lint = shell_job("a");
        lint.error_policy = ErrorPolicy::Ignore;
        let task = task_with(vec![vec![lint, shell_job("b")], vec![shell_job("c")]]);

        let (_, running) = start(&fakes, task).await;
        let task = running.await.unwrap();

        assert_eq!(task.status, Status::Passed);
        assert_eq!(task.stages[0].status, Status::Passed);
        assert_eq!(statuses(&task.stages[0]), vec![Status::Failed, Status::Passed]);
        assert_eq!(task.stages[1].status, Status::Passed);
    }

    #[tokio::test]
    async fn test_outputs_flow_to_later_stage() {
        let outputs = BTreeMap::from([("VERSION".to_string(), "2.0.1".to_string())]);
        let fakes = Fakes::new(ScriptedDispatcher::new().script("build", Script::Pass(outputs)));
        let task = task_with(vec![vec![shell_job("build")], vec![shell_job("publish")]]);

        let (_, running) = start(&fakes, task).await;
        let task = running.await.unwrap();

        assert_eq!(task.status, Status::Passed);
        assert_eq!(task.global_context["build.VERSION"], "2.0.1");
    }

    #[tokio::test]
    async fn test_cancel_marks_remaining_work_cancelled() {
        let fakes = Fakes::new(ScriptedDispatcher::new().script("a", Script::Hang));
        let task = task_with(vec![vec![shell_job("a")], vec![shell_job("b")]]);

        let (scheduler, running) = start(&fakes, task).await;
        while fakes.dispatcher.dispatched().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(scheduler.cancels().cancel("release", 1));
        let task = running.await.unwrap();

        assert_eq!(task.status, Status::Cancelled);
        assert_eq!(task.stages[0].jobs[0].status, Status::Cancelled);
        assert_eq!(task.stages[1].status, Status::Cancelled);
        assert_eq!(task.stages[1].jobs[0].status, Status::Cancelled);
        assert!(!scheduler.cancels().is_running("release", 1));
    }

    #[tokio::test]
    async fn test_manual_check_continue() {
        let fakes = Fakes::new(ScriptedDispatcher::new().script("a", Script::Fail("exit status 1")));
        let mut job = shell_job("a");
        job.error_policy = ErrorPolicy::ManualCheck;
        let task = task_with(vec![vec![job], vec![shell_job("b")]]);

        let (_, running) = start(&fakes, task).await;
        let key = DecisionKey::job("release", 1, "a");
        while !fakes.decisions.is_waiting(&key) {
            tokio::task::yield_now().await;
        }
        let paused = fakes.store.find_task("release", 1).await.unwrap().unwrap();
        assert_eq!(paused.stages[0].jobs[0].status, Status::ManualCheck);

        fakes
            .decisions
            .submit(
                &key,
                Decision::Manual {
                    user: "amy".to_string(),
                    decision: ManualDecision::Continue,
                },
            )
            .unwrap();
        let task = running.await.unwrap();

        assert_eq!(task.status, Status::Passed);
        assert_eq!(task.stages[0].jobs[0].status, Status::Failed);
        assert_eq!(task.stages[1].status, Status::Passed);
    }

    #[tokio::test]
    async fn test_gate_rejection_skips_every_stage() {
        let fakes = Fakes::new(ScriptedDispatcher::new());
        let mut task = task_with(vec![vec![shell_job("a")]]);
        task.approval = Some(ApprovalGate {
            enabled: true,
            approvers: vec!["bo".to_string()],
            needed_approvers: 1,
            ..Default::default()
        });

        let (_, running) = start(&fakes, task).await;
        let key = DecisionKey::workflow("release", 1);
        while !fakes.decisions.is_waiting(&key) {
            tokio::task::yield_now().await;
        }
        fakes.decisions.submit(&key, vote("bo", false, "not today")).unwrap();
        let task = running.await.unwrap();

        assert_eq!(task.status, Status::Rejected);
        assert_eq!(task.error.as_deref(), Some("rejected by bo"));
        assert_eq!(task.stages[0].status, Status::Skipped);
        assert!(fakes.dispatcher.dispatched().is_empty());
    }
}
