//! PostgreSQL-backed store
//!
//! Implements the store traits on top of the per-entity query modules.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use taskline_core::domain::catalog::CatalogKind;
use taskline_core::domain::cronjob::{Cronjob, CronjobParent};
use taskline_core::domain::job_info::JobInfo;
use taskline_core::domain::log::LogEntry;
use taskline_core::domain::runner::Runner;
use taskline_core::domain::task::WorkflowTask;
use taskline_core::domain::workflow::WorkflowDefinition;
use taskline_core::dto::runner::RegisterRunner;

use super::{
    Catalog, CronjobStore, JobInfoStore, LogStore, MsgQueue, QueueMessage, RunnerStore,
    StoreResult, TaskStore, WorkflowStore, catalog_repository, cronjob_repository,
    job_info_repository, log_repository, queue_repository, runner_repository, task_repository,
    workflow_repository,
};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> StoreResult<()> {
        workflow_repository::save(&self.pool, workflow).await
    }

    async fn find_workflow(&self, name: &str) -> StoreResult<Option<WorkflowDefinition>> {
        workflow_repository::find_by_name(&self.pool, name).await
    }

    async fn list_workflows(&self) -> StoreResult<Vec<WorkflowDefinition>> {
        workflow_repository::list_all(&self.pool).await
    }
}

#[async_trait]
impl TaskStore for PgStore {
    async fn next_task_id(&self, workflow_name: &str) -> StoreResult<i64> {
        task_repository::next_task_id(&self.pool, workflow_name).await
    }

    async fn create_task(&self, task: &WorkflowTask) -> StoreResult<()> {
        task_repository::create(&self.pool, task).await
    }

    async fn update_task(&self, task: &WorkflowTask) -> StoreResult<()> {
        task_repository::update(&self.pool, task).await
    }

    async fn find_task(
        &self,
        workflow_name: &str,
        task_id: i64,
    ) -> StoreResult<Option<WorkflowTask>> {
        task_repository::find(&self.pool, workflow_name, task_id).await
    }

    async fn list_tasks(&self, workflow_name: &str, limit: i64) -> StoreResult<Vec<WorkflowTask>> {
        task_repository::list_by_workflow(&self.pool, workflow_name, limit).await
    }

    async fn list_unfinished_tasks(&self) -> StoreResult<Vec<WorkflowTask>> {
        task_repository::list_unfinished(&self.pool).await
    }
}

#[async_trait]
impl CronjobStore for PgStore {
    async fn list_cronjobs(
        &self,
        parent_name: &str,
        parent_type: CronjobParent,
    ) -> StoreResult<Vec<Cronjob>> {
        cronjob_repository::list_by_parent(&self.pool, parent_name, parent_type).await
    }

    async fn list_enabled_cronjobs(&self) -> StoreResult<Vec<Cronjob>> {
        cronjob_repository::list_enabled(&self.pool).await
    }

    async fn create_cronjob(&self, cronjob: &Cronjob) -> StoreResult<()> {
        cronjob_repository::create(&self.pool, cronjob).await
    }

    async fn update_cronjob(&self, cronjob: &Cronjob) -> StoreResult<()> {
        cronjob_repository::update(&self.pool, cronjob).await
    }

    async fn delete_cronjobs(&self, ids: &[String]) -> StoreResult<u64> {
        cronjob_repository::delete_by_ids(&self.pool, ids).await
    }
}

#[async_trait]
impl MsgQueue for PgStore {
    async fn publish(&self, topic: &str, payload: JsonValue) -> StoreResult<()> {
        queue_repository::publish(&self.pool, topic, payload).await
    }

    async fn consume(&self, topic: &str, limit: i64) -> StoreResult<Vec<QueueMessage>> {
        queue_repository::consume(&self.pool, topic, limit).await
    }
}

#[async_trait]
impl JobInfoStore for PgStore {
    async fn insert_job_info(&self, info: &JobInfo) -> StoreResult<()> {
        job_info_repository::insert(&self.pool, info).await
    }

    async fn list_job_infos(&self, workflow_name: Option<&str>) -> StoreResult<Vec<JobInfo>> {
        job_info_repository::list(&self.pool, workflow_name).await
    }
}

#[async_trait]
impl LogStore for PgStore {
    async fn append_logs(
        &self,
        workflow_name: &str,
        task_id: i64,
        job_name: &str,
        entries: &[LogEntry],
    ) -> StoreResult<()> {
        log_repository::add_entries(&self.pool, workflow_name, task_id, job_name, entries).await
    }

    async fn find_logs(
        &self,
        workflow_name: &str,
        task_id: i64,
        job_name: &str,
    ) -> StoreResult<Vec<LogEntry>> {
        log_repository::find_by_job(&self.pool, workflow_name, task_id, job_name).await
    }
}

#[async_trait]
impl RunnerStore for PgStore {
    async fn register_runner(&self, req: &RegisterRunner) -> StoreResult<Runner> {
        runner_repository::register(&self.pool, req).await
    }

    async fn update_heartbeat(&self, runner_id: &str) -> StoreResult<bool> {
        runner_repository::update_heartbeat(&self.pool, runner_id).await
    }

    async fn find_runner(&self, id: &str) -> StoreResult<Option<Runner>> {
        runner_repository::find_by_id(&self.pool, id).await
    }

    async fn list_runners(&self) -> StoreResult<Vec<Runner>> {
        runner_repository::list_all(&self.pool).await
    }

    async fn delete_runner(&self, id: &str) -> StoreResult<bool> {
        runner_repository::delete(&self.pool, id).await
    }

    async fn mark_stale_runners_offline(&self, timeout_seconds: i64) -> StoreResult<u64> {
        runner_repository::mark_stale_runners_offline(&self.pool, timeout_seconds).await
    }
}

#[async_trait]
impl Catalog for PgStore {
    async fn get_record(&self, kind: CatalogKind, key: &str) -> StoreResult<Option<JsonValue>> {
        catalog_repository::get(&self.pool, kind, key).await
    }

    async fn list_records(&self, kind: CatalogKind) -> StoreResult<Vec<JsonValue>> {
        catalog_repository::list(&self.pool, kind).await
    }

    async fn upsert_record(
        &self,
        kind: CatalogKind,
        key: &str,
        document: JsonValue,
    ) -> StoreResult<()> {
        catalog_repository::upsert(&self.pool, kind, key, document).await
    }
}
