//! Shared state of a running workflow task
//!
//! Jobs of a stage run concurrently, each on its own copy of its
//! `JobTask`. Every acknowledgement writes that copy back into the task
//! document together with a snapshot of the global context, then persists
//! the document.

use std::sync::Arc;

use taskline_core::GlobalContext;
use taskline_core::domain::task::{JobTask, WorkflowTask};
use tokio::sync::Mutex;

use crate::repository::TaskStore;

pub struct TaskHandle {
    pub workflow_name: String,
    pub workflow_display_name: String,
    pub project: String,
    pub task_id: i64,
    pub global: GlobalContext,
    document: Mutex<WorkflowTask>,
    store: Arc<dyn TaskStore>,
}

impl TaskHandle {
    pub fn new(task: WorkflowTask, store: Arc<dyn TaskStore>) -> Self {
        Self {
            workflow_name: task.workflow_name.clone(),
            workflow_display_name: task.workflow_display_name.clone(),
            project: task.project.clone(),
            task_id: task.task_id,
            global: GlobalContext::from_map(task.global_context.clone()),
            document: Mutex::new(task),
            store,
        }
    }

    /// Writes a job's current state back and persists the task
    pub async fn ack_job(&self, job: &JobTask) {
        self.update(|task| {
            let slot = task
                .stages
                .iter_mut()
                .flat_map(|stage| stage.jobs.iter_mut())
                .find(|j| j.key == job.key);
            match slot {
                Some(slot) => *slot = job.clone(),
                None => tracing::warn!("Job {} is not part of the task", job.key),
            }
        })
        .await;
    }

    /// Applies a change to the task document and persists it
    pub async fn update<F>(&self, change: F)
    where
        F: FnOnce(&mut WorkflowTask),
    {
        let mut task = self.document.lock().await;
        change(&mut task);
        task.global_context = self.global.snapshot();
        if let Err(e) = self.store.update_task(&task).await {
            tracing::error!(
                "Failed to persist task {}#{}: {}",
                self.workflow_name,
                self.task_id,
                e
            );
        }
    }

    pub async fn snapshot(&self) -> WorkflowTask {
        self.document.lock().await.clone()
    }
}
