//! Repository Module
//!
//! Data access layer for the orchestrator.
//! Each submodule holds the PostgreSQL queries for one entity as free
//! functions on a pool. The store traits below are the seams the engine
//! depends on; `PgStore` implements them on top of those functions and
//! `MemoryStore` implements them in process.

pub mod catalog;
pub mod cronjob;
pub mod job_info;
pub mod log;
pub mod memory;
pub mod postgres;
pub mod queue;
pub mod runner;
pub mod task;
pub mod workflow;

// Re-export for convenience
pub use catalog as catalog_repository;
pub use cronjob as cronjob_repository;
pub use job_info as job_info_repository;
pub use log as log_repository;
pub use queue as queue_repository;
pub use runner as runner_repository;
pub use task as task_repository;
pub use workflow as workflow_repository;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use taskline_core::domain::catalog::CatalogKind;
use taskline_core::domain::cronjob::{Cronjob, CronjobParent};
use taskline_core::domain::job_info::JobInfo;
use taskline_core::domain::log::LogEntry;
use taskline_core::domain::runner::Runner;
use taskline_core::domain::task::WorkflowTask;
use taskline_core::domain::workflow::WorkflowDefinition;
use taskline_core::dto::runner::RegisterRunner;

/// Store error type
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("malformed document: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub(crate) fn from_document<T: DeserializeOwned>(document: JsonValue) -> StoreResult<T> {
    Ok(serde_json::from_value(document)?)
}

// =============================================================================
// Store Traits
// =============================================================================

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> StoreResult<()>;
    async fn find_workflow(&self, name: &str) -> StoreResult<Option<WorkflowDefinition>>;
    async fn list_workflows(&self) -> StoreResult<Vec<WorkflowDefinition>>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Allocates the next task ID of a workflow, never handing out the same one twice
    async fn next_task_id(&self, workflow_name: &str) -> StoreResult<i64>;
    async fn create_task(&self, task: &WorkflowTask) -> StoreResult<()>;
    async fn update_task(&self, task: &WorkflowTask) -> StoreResult<()>;
    async fn find_task(&self, workflow_name: &str, task_id: i64)
    -> StoreResult<Option<WorkflowTask>>;
    async fn list_tasks(&self, workflow_name: &str, limit: i64) -> StoreResult<Vec<WorkflowTask>>;
    /// Tasks whose status is not terminal
    async fn list_unfinished_tasks(&self) -> StoreResult<Vec<WorkflowTask>>;
}

#[async_trait]
pub trait CronjobStore: Send + Sync {
    async fn list_cronjobs(
        &self,
        parent_name: &str,
        parent_type: CronjobParent,
    ) -> StoreResult<Vec<Cronjob>>;
    async fn list_enabled_cronjobs(&self) -> StoreResult<Vec<Cronjob>>;
    async fn create_cronjob(&self, cronjob: &Cronjob) -> StoreResult<()>;
    async fn update_cronjob(&self, cronjob: &Cronjob) -> StoreResult<()>;
    async fn delete_cronjobs(&self, ids: &[String]) -> StoreResult<u64>;
}

/// A message taken off a queue topic
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: i64,
    pub topic: String,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait MsgQueue: Send + Sync {
    async fn publish(&self, topic: &str, payload: JsonValue) -> StoreResult<()>;
    /// Takes up to `limit` unconsumed messages in publish order
    async fn consume(&self, topic: &str, limit: i64) -> StoreResult<Vec<QueueMessage>>;
}

#[async_trait]
pub trait JobInfoStore: Send + Sync {
    async fn insert_job_info(&self, info: &JobInfo) -> StoreResult<()>;
    async fn list_job_infos(&self, workflow_name: Option<&str>) -> StoreResult<Vec<JobInfo>>;
}

#[async_trait]
pub trait LogStore: Send + Sync {
    async fn append_logs(
        &self,
        workflow_name: &str,
        task_id: i64,
        job_name: &str,
        entries: &[LogEntry],
    ) -> StoreResult<()>;
    async fn find_logs(
        &self,
        workflow_name: &str,
        task_id: i64,
        job_name: &str,
    ) -> StoreResult<Vec<LogEntry>>;
}

#[async_trait]
pub trait RunnerStore: Send + Sync {
    async fn register_runner(&self, req: &RegisterRunner) -> StoreResult<Runner>;
    async fn update_heartbeat(&self, runner_id: &str) -> StoreResult<bool>;
    async fn find_runner(&self, id: &str) -> StoreResult<Option<Runner>>;
    async fn list_runners(&self) -> StoreResult<Vec<Runner>>;
    async fn delete_runner(&self, id: &str) -> StoreResult<bool>;
    async fn mark_stale_runners_offline(&self, timeout_seconds: i64) -> StoreResult<u64>;
}

/// Raw catalog documents keyed by kind and name or ID
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_record(&self, kind: CatalogKind, key: &str) -> StoreResult<Option<JsonValue>>;
    async fn list_records(&self, kind: CatalogKind) -> StoreResult<Vec<JsonValue>>;
    async fn upsert_record(&self, kind: CatalogKind, key: &str, document: JsonValue)
    -> StoreResult<()>;
}
