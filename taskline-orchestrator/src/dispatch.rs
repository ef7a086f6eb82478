//! Runner dispatch
//!
//! Freestyle job controllers hand their step lists to a `JobDispatcher`.
//! `RunnerQueue` is the in-process implementation: runners claim queued
//! jobs over the HTTP API, report step progress and completion, and poll
//! for cancellation. Reports are forwarded to the waiting controller as
//! `DispatchEvent`s.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use taskline_core::domain::status::Status;
use taskline_core::dto::dispatch::{ClaimRequest, DispatchCompletion, DispatchedJob, StepUpdate};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatch {0} not found")]
    NotFound(Uuid),
    #[error("dispatch {dispatch_id} is claimed by runner {owner}")]
    NotOwner { dispatch_id: Uuid, owner: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    Step(StepUpdate),
    Completed(DispatchCompletion),
}

pub type DispatchEvents = mpsc::UnboundedReceiver<DispatchEvent>;

#[async_trait]
pub trait JobDispatcher: Send + Sync {
    /// Queues a job; events arrive until a `Completed` is sent
    async fn dispatch(&self, job: DispatchedJob) -> Result<DispatchEvents, DispatchError>;
    /// Asks the executor to stop at the next step boundary
    async fn cancel(&self, dispatch_id: Uuid);
    /// Forgets a dispatch whose controller stopped waiting
    async fn abandon(&self, dispatch_id: Uuid);
}

struct InFlight {
    job: DispatchedJob,
    events: mpsc::UnboundedSender<DispatchEvent>,
    runner_id: Option<String>,
    cancelled: bool,
}

/// Identity of the job behind a dispatch, for routing runner logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOwner {
    pub workflow_name: String,
    pub task_id: i64,
    pub job_name: String,
}

#[derive(Default)]
pub struct RunnerQueue {
    pending: Mutex<VecDeque<Uuid>>,
    jobs: DashMap<Uuid, InFlight>,
}

impl RunnerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, VecDeque<Uuid>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands the oldest queued job the runner can execute to it
    pub fn claim(&self, req: &ClaimRequest) -> Option<DispatchedJob> {
        let mut pending = self.pending();
        let position = pending.iter().position(|id| {
            self.jobs
                .get(id)
                .is_some_and(|entry| req.infrastructures.contains(&entry.job.infrastructure))
        })?;
        let id = pending.remove(position)?;
        let mut entry = self.jobs.get_mut(&id)?;
        entry.runner_id = Some(req.runner_id.clone());
        tracing::info!(
            "Runner {} claimed job {} of {}#{}",
            req.runner_id,
            entry.job.job_name,
            entry.job.workflow_name,
            entry.job.task_id
        );
        Some(entry.job.clone())
    }

    fn check_owner(&self, dispatch_id: Uuid, runner_id: Option<&str>) -> Result<(), DispatchError> {
        let entry = self
            .jobs
            .get(&dispatch_id)
            .ok_or(DispatchError::NotFound(dispatch_id))?;
        match (&entry.runner_id, runner_id) {
            (Some(owner), runner) if runner != Some(owner.as_str()) => {
                Err(DispatchError::NotOwner {
                    dispatch_id,
                    owner: owner.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    pub fn step_update(
        &self,
        dispatch_id: Uuid,
        runner_id: Option<&str>,
        update: StepUpdate,
    ) -> Result<(), DispatchError> {
        self.check_owner(dispatch_id, runner_id)?;
        let entry = self
            .jobs
            .get(&dispatch_id)
            .ok_or(DispatchError::NotFound(dispatch_id))?;
        if entry.events.send(DispatchEvent::Step(update)).is_err() {
            tracing::debug!("Controller of dispatch {} stopped listening", dispatch_id);
        }
        Ok(())
    }

    pub fn complete(
        &self,
        dispatch_id: Uuid,
        runner_id: Option<&str>,
        completion: DispatchCompletion,
    ) -> Result<(), DispatchError> {
        self.check_owner(dispatch_id, runner_id)?;
        let (_, entry) = self
            .jobs
            .remove(&dispatch_id)
            .ok_or(DispatchError::NotFound(dispatch_id))?;
        tracing::info!(
            "Job {} of {}#{} completed with {}",
            entry.job.job_name,
            entry.job.workflow_name,
            entry.job.task_id,
            completion.status
        );
        let _ = entry.events.send(DispatchEvent::Completed(completion));
        Ok(())
    }

    pub fn is_cancelled(&self, dispatch_id: Uuid) -> Result<bool, DispatchError> {
        self.jobs
            .get(&dispatch_id)
            .map(|entry| entry.cancelled)
            .ok_or(DispatchError::NotFound(dispatch_id))
    }

    pub fn owner(&self, dispatch_id: Uuid) -> Option<DispatchOwner> {
        self.jobs.get(&dispatch_id).map(|entry| DispatchOwner {
            workflow_name: entry.job.workflow_name.clone(),
            task_id: entry.job.task_id,
            job_name: entry.job.job_name.clone(),
        })
    }

    /// Number of jobs waiting for a runner
    pub fn queued(&self) -> usize {
        self.pending().len()
    }
}

#[async_trait]
impl JobDispatcher for RunnerQueue {
    async fn dispatch(&self, job: DispatchedJob) -> Result<DispatchEvents, DispatchError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = job.dispatch_id;
        tracing::debug!(
            "Queueing job {} of {}#{} as dispatch {}",
            job.job_name,
            job.workflow_name,
            job.task_id,
            id
        );
        self.jobs.insert(
            id,
            InFlight {
                job,
                events: tx,
                runner_id: None,
                cancelled: false,
            },
        );
        self.pending().push_back(id);
        Ok(rx)
    }

    async fn cancel(&self, dispatch_id: Uuid) {
        let was_queued = {
            let mut pending = self.pending();
            match pending.iter().position(|id| *id == dispatch_id) {
                Some(position) => {
                    pending.remove(position);
                    true
                }
                None => false,
            }
        };

        if was_queued {
            if let Some((_, entry)) = self.jobs.remove(&dispatch_id) {
                let _ = entry.events.send(DispatchEvent::Completed(DispatchCompletion {
                    status: Status::Cancelled,
                    error: None,
                    outputs: Default::default(),
                }));
            }
            return;
        }

        if let Some(mut entry) = self.jobs.get_mut(&dispatch_id) {
            entry.cancelled = true;
        }
    }

    async fn abandon(&self, dispatch_id: Uuid) {
        self.pending().retain(|id| *id != dispatch_id);
        self.jobs.remove(&dispatch_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskline_core::domain::common::Infrastructure;
    use taskline_core::domain::status::StepStatus;

    fn dispatched(job_name: &str, infrastructure: Infrastructure) -> DispatchedJob {
        DispatchedJob {
            dispatch_id: Uuid::new_v4(),
            workflow_name: "release".to_string(),
            task_id: 1,
            job_name: job_name.to_string(),
            job_key: job_name.to_string(),
            infrastructure,
            timeout: 10,
            properties: Default::default(),
            steps: Vec::new(),
            outputs: Vec::new(),
        }
    }

    fn claim(runner: &str, infrastructures: &[Infrastructure]) -> ClaimRequest {
        ClaimRequest {
            runner_id: runner.to_string(),
            infrastructures: infrastructures.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_claim_matches_infrastructure_in_queue_order() {
        let queue = RunnerQueue::new();
        let k8s = dispatched("build", Infrastructure::Kubernetes);
        let vm = dispatched("package", Infrastructure::Vm);
        queue.dispatch(k8s.clone()).await.unwrap();
        queue.dispatch(vm.clone()).await.unwrap();

        let claimed = queue.claim(&claim("vm-1", &[Infrastructure::Vm])).unwrap();
        assert_eq!(claimed.dispatch_id, vm.dispatch_id);
        assert!(queue.claim(&claim("vm-1", &[Infrastructure::Vm])).is_none());
        assert_eq!(queue.queued(), 1);
    }

    #[tokio::test]
    async fn test_reports_reach_the_controller() {
        let queue = RunnerQueue::new();
        let job = dispatched("build", Infrastructure::Kubernetes);
        let mut events = queue.dispatch(job.clone()).await.unwrap();
        queue.claim(&claim("r1", &[Infrastructure::Kubernetes]));

        let update = StepUpdate {
            name: "git".to_string(),
            status: StepStatus::Passed,
            error: None,
            start_time: None,
            end_time: None,
        };
        queue.step_update(job.dispatch_id, Some("r1"), update.clone()).unwrap();
        queue
            .complete(
                job.dispatch_id,
                Some("r1"),
                DispatchCompletion {
                    status: Status::Passed,
                    error: None,
                    outputs: Default::default(),
                },
            )
            .unwrap();

        assert_eq!(events.recv().await, Some(DispatchEvent::Step(update)));
        assert!(matches!(
            events.recv().await,
            Some(DispatchEvent::Completed(c)) if c.status == Status::Passed
        ));
        assert!(matches!(
            queue.is_cancelled(job.dispatch_id),
            Err(DispatchError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_other_runner_can_not_report() {
        let queue = RunnerQueue::new();
        let job = dispatched("build", Infrastructure::Kubernetes);
        let _events = queue.dispatch(job.clone()).await.unwrap();
        queue.claim(&claim("r1", &[Infrastructure::Kubernetes]));

        let result = queue.complete(
            job.dispatch_id,
            Some("r2"),
            DispatchCompletion {
                status: Status::Passed,
                error: None,
                outputs: Default::default(),
            },
        );
        assert!(matches!(result, Err(DispatchError::NotOwner { .. })));
    }

    #[tokio::test]
    async fn test_claimed_job_requires_runner_id() {
        let queue = RunnerQueue::new();
        let job = dispatched("build", Infrastructure::Kubernetes);
        let _events = queue.dispatch(job.clone()).await.unwrap();
        queue.claim(&claim("r1", &[Infrastructure::Kubernetes]));

        let result = queue.complete(
            job.dispatch_id,
            None,
            DispatchCompletion {
                status: Status::Passed,
                error: None,
                outputs: Default::default(),
            },
        );
        assert!(matches!(result, Err(DispatchError::NotOwner { .. })));
        assert!(!queue.is_cancelled(job.dispatch_id).unwrap());
    }

    #[tokio::test]
    async fn test_cancel_queued_job_completes_it() {
        let queue = RunnerQueue::new();
        let job = dispatched("build", Infrastructure::Kubernetes);
        let mut events = queue.dispatch(job.clone()).await.unwrap();

        queue.cancel(job.dispatch_id).await;

        assert!(matches!(
            events.recv().await,
            Some(DispatchEvent::Completed(c)) if c.status == Status::Cancelled
        ));
        assert_eq!(queue.queued(), 0);
    }

    #[tokio::test]
    async fn test_cancel_claimed_job_sets_flag() {
        let queue = RunnerQueue::new();
        let job = dispatched("build", Infrastructure::Kubernetes);
        let _events = queue.dispatch(job.clone()).await.unwrap();
        queue.claim(&claim("r1", &[Infrastructure::Kubernetes]));

        queue.cancel(job.dispatch_id).await;

        assert!(queue.is_cancelled(job.dispatch_id).unwrap());
    }
}
