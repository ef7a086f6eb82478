//! Job poller
//!
//! Claims queued job tasks from the orchestrator and executes them.
//! Each job runs in its own task with a context holding its workspace, log
//! buffer and object store; a companion task ships the log on an interval.

use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result};
use async_trait::async_trait;
use taskline_client::OrchestratorClient;
use taskline_core::domain::status::Status;
use taskline_core::dto::dispatch::{DispatchCompletion, DispatchedJob, StepUpdate};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::context::JobContext;
use crate::object_store::ObjectStore;
use crate::service::{ExecutionService, InMemoryLogBuffer, JobReporter, LogBufferService};
use crate::step::step_secrets;

/// Reports a dispatched job's progress through the dispatch API
struct DispatchReporter {
    client: Arc<OrchestratorClient>,
    dispatch_id: Uuid,
}

#[async_trait]
impl JobReporter for DispatchReporter {
    async fn report_step(&self, update: StepUpdate) {
        if let Err(e) = self.client.update_step(self.dispatch_id, &update).await {
            warn!("Failed to report step {} of {}: {}", update.name, self.dispatch_id, e);
        }
    }

    /// An unreachable orchestrator does not stop the job
    async fn is_cancelled(&self) -> bool {
        match self.client.is_cancelled(self.dispatch_id).await {
            Ok(cancelled) => cancelled,
            Err(e) => {
                warn!("Failed to poll cancellation of {}: {}", self.dispatch_id, e);
                false
            }
        }
    }
}

/// Job poller that continuously claims and executes jobs
pub struct JobPoller {
    config: Config,
    client: Arc<OrchestratorClient>,
    execution: Arc<dyn ExecutionService>,
    object_store: Arc<dyn ObjectStore>,
    semaphore: Arc<Semaphore>,
}

impl JobPoller {
    pub fn new(
        config: Config,
        client: Arc<OrchestratorClient>,
        execution: Arc<dyn ExecutionService>,
        object_store: Arc<dyn ObjectStore>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_jobs));
        Self {
            config,
            client,
            execution,
            object_store,
            semaphore,
        }
    }

    /// Polls until `shutdown` fires, then waits for running jobs to finish
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(
            "Starting job poller (interval: {:?}, max parallel jobs: {})",
            self.config.poll_interval, self.config.max_parallel_jobs
        );

        let heartbeat = self.start_heartbeat_loop();
        let mut interval = time::interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.claim_available().await {
                Ok(claimed) if claimed > 0 => info!("Claimed {} job(s) this cycle", claimed),
                Ok(_) => debug!("No jobs available"),
                Err(e) => error!("Error during poll cycle: {:#}", e),
            }
        }

        heartbeat.abort();
        info!("Waiting for running jobs to finish");
        let _all = self
            .semaphore
            .acquire_many(self.config.max_parallel_jobs as u32)
            .await
            .context("Job semaphore closed")?;
        Ok(())
    }

    /// Claims jobs while there are free slots and queued work
    async fn claim_available(&self) -> Result<usize> {
        let mut claimed = 0;
        loop {
            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                debug!("Max parallel jobs reached");
                return Ok(claimed);
            };

            let job = self
                .client
                .claim_job(&self.config.runner_id, &self.config.infrastructures)
                .await
                .context("Failed to claim job")?;

            let Some(job) = job else {
                return Ok(claimed);
            };

            info!(
                "Claimed job {} of {}#{} (dispatch {})",
                job.job_name, job.workflow_name, job.task_id, job.dispatch_id
            );
            self.spawn_job_task(job, permit);
            claimed += 1;
        }
    }

    fn spawn_job_task(&self, job: DispatchedJob, permit: OwnedSemaphorePermit) {
        let client = Arc::clone(&self.client);
        let execution = Arc::clone(&self.execution);
        let object_store = Arc::clone(&self.object_store);
        let config = self.config.clone();

        tokio::spawn(async move {
            let dispatch_id = job.dispatch_id;
            if let Err(e) = Self::execute_job(job, config, client, execution, object_store).await {
                error!("Failed to execute job {}: {:#}", dispatch_id, e);
            }
            drop(permit);
        });
    }

    /// Executes a single job with log streaming
    async fn execute_job(
        job: DispatchedJob,
        config: Config,
        client: Arc<OrchestratorClient>,
        execution: Arc<dyn ExecutionService>,
        object_store: Arc<dyn ObjectStore>,
    ) -> Result<()> {
        let dispatch_id = job.dispatch_id;
        let logs = InMemoryLogBuffer::new(config.log_buffer_size);

        let mut ctx = JobContext::new(
            &job,
            &config.workspace_base,
            Arc::new(logs.clone()),
            object_store,
        );
        for step in &job.steps {
            for secret in step_secrets(&step.spec) {
                ctx.add_secret(secret);
            }
        }

        let log_sender = Self::spawn_log_sender(
            dispatch_id,
            logs.clone(),
            Arc::clone(&client),
            config.log_send_interval,
        );

        let completion = match ctx.prepare().await {
            Ok(()) => {
                let reporter = DispatchReporter {
                    client: Arc::clone(&client),
                    dispatch_id,
                };
                execution.execute_job(&job, &ctx, &reporter).await
            }
            Err(e) => {
                ctx.log_error(format!("Failed to prepare workspace: {}", e));
                DispatchCompletion {
                    status: Status::Failed,
                    error: Some(format!("failed to prepare workspace: {}", e)),
                    outputs: Default::default(),
                }
            }
        };

        log_sender.abort();
        let remaining = logs.drain();
        if !remaining.is_empty() {
            debug!("Sending {} remaining logs for job {}", remaining.len(), dispatch_id);
            if let Err(e) = client.send_logs(dispatch_id, remaining).await {
                warn!("Failed to send final logs: {:#}", e);
            }
        }

        ctx.cleanup().await;

        client
            .complete_job(dispatch_id, &completion)
            .await
            .context("Failed to complete job")?;
        info!("Job {} reported as {}", dispatch_id, completion.status);
        Ok(())
    }

    /// Ships buffered logs on every tick, or early when the buffer fills up
    fn spawn_log_sender(
        dispatch_id: Uuid,
        logs: InMemoryLogBuffer,
        client: Arc<OrchestratorClient>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = logs.filled() => {}
                }

                let batch = logs.drain();
                if batch.is_empty() {
                    continue;
                }

                debug!("Sending {} logs for job {}", batch.len(), dispatch_id);
                if let Err(e) = client.send_logs(dispatch_id, batch).await {
                    error!("Failed to send logs for job {}: {:#}", dispatch_id, e);
                }
            }
        })
    }

    /// Starts a background task to send heartbeats
    fn start_heartbeat_loop(&self) -> tokio::task::JoinHandle<()> {
        let client = Arc::clone(&self.client);
        let runner_id = self.config.runner_id.clone();
        let heartbeat_interval = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval(heartbeat_interval);

            loop {
                ticker.tick().await;

                debug!("Sending heartbeat");

                if let Err(e) = client.send_heartbeat(&runner_id).await {
                    warn!("Failed to send heartbeat: {:#}", e);
                }
            }
        })
    }
}
