//! In-process store
//!
//! Keeps everything in maps behind a mutex. Used by tests and when the
//! orchestrator runs without a database.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use taskline_core::domain::catalog::CatalogKind;
use taskline_core::domain::cronjob::{Cronjob, CronjobParent};
use taskline_core::domain::job_info::JobInfo;
use taskline_core::domain::log::LogEntry;
use taskline_core::domain::runner::{Runner, RunnerStatus};
use taskline_core::domain::task::WorkflowTask;
use taskline_core::domain::workflow::WorkflowDefinition;
use taskline_core::dto::runner::RegisterRunner;

use super::{
    Catalog, CronjobStore, JobInfoStore, LogStore, MsgQueue, QueueMessage, RunnerStore,
    StoreResult, TaskStore, WorkflowStore,
};

type LogKey = (String, i64, String);

#[derive(Default)]
struct Inner {
    workflows: BTreeMap<String, WorkflowDefinition>,
    task_counters: HashMap<String, i64>,
    tasks: BTreeMap<(String, i64), WorkflowTask>,
    cronjobs: BTreeMap<String, Cronjob>,
    queue: Vec<(QueueMessage, bool)>,
    job_infos: Vec<JobInfo>,
    logs: HashMap<LogKey, Vec<LogEntry>>,
    runners: BTreeMap<String, Runner>,
    catalog: BTreeMap<(CatalogKind, String), JsonValue>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut inner)
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> StoreResult<()> {
        self.with(|s| {
            s.workflows.insert(workflow.name.clone(), workflow.clone());
        });
        Ok(())
    }

    async fn find_workflow(&self, name: &str) -> StoreResult<Option<WorkflowDefinition>> {
        Ok(self.with(|s| s.workflows.get(name).cloned()))
    }

    async fn list_workflows(&self) -> StoreResult<Vec<WorkflowDefinition>> {
        Ok(self.with(|s| s.workflows.values().cloned().collect()))
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn next_task_id(&self, workflow_name: &str) -> StoreResult<i64> {
        Ok(self.with(|s| {
            let counter = s.task_counters.entry(workflow_name.to_string()).or_insert(0);
            *counter += 1;
            *counter
        }))
    }

    async fn create_task(&self, task: &WorkflowTask) -> StoreResult<()> {
        self.with(|s| {
            s.tasks
                .insert((task.workflow_name.clone(), task.task_id), task.clone());
        });
        Ok(())
    }

    async fn update_task(&self, task: &WorkflowTask) -> StoreResult<()> {
        self.with(|s| {
            if let Some(stored) = s.tasks.get_mut(&(task.workflow_name.clone(), task.task_id)) {
                *stored = task.clone();
            }
        });
        Ok(())
    }

    async fn find_task(
        &self,
        workflow_name: &str,
        task_id: i64,
    ) -> StoreResult<Option<WorkflowTask>> {
        Ok(self.with(|s| s.tasks.get(&(workflow_name.to_string(), task_id)).cloned()))
    }

    async fn list_tasks(&self, workflow_name: &str, limit: i64) -> StoreResult<Vec<WorkflowTask>> {
        Ok(self.with(|s| {
            s.tasks
                .values()
                .rev()
                .filter(|t| t.workflow_name == workflow_name)
                .take(limit.max(0) as usize)
                .cloned()
                .collect()
        }))
    }

    async fn list_unfinished_tasks(&self) -> StoreResult<Vec<WorkflowTask>> {
        Ok(self.with(|s| {
            s.tasks
                .values()
                .filter(|t| !t.status.is_terminal())
                .cloned()
                .collect()
        }))
    }
}

#[async_trait]
impl CronjobStore for MemoryStore {
    async fn list_cronjobs(
        &self,
        parent_name: &str,
        parent_type: CronjobParent,
    ) -> StoreResult<Vec<Cronjob>> {
        Ok(self.with(|s| {
            s.cronjobs
                .values()
                .filter(|c| c.name == parent_name && c.parent_type == parent_type)
                .cloned()
                .collect()
        }))
    }

    async fn list_enabled_cronjobs(&self) -> StoreResult<Vec<Cronjob>> {
        Ok(self.with(|s| {
            s.cronjobs
                .values()
                .filter(|c| c.schedule.enabled)
                .cloned()
                .collect()
        }))
    }

    async fn create_cronjob(&self, cronjob: &Cronjob) -> StoreResult<()> {
        self.with(|s| {
            s.cronjobs.insert(cronjob.id.clone(), cronjob.clone());
        });
        Ok(())
    }

    async fn update_cronjob(&self, cronjob: &Cronjob) -> StoreResult<()> {
        self.with(|s| {
            if let Some(stored) = s.cronjobs.get_mut(&cronjob.id) {
                *stored = cronjob.clone();
            }
        });
        Ok(())
    }

    async fn delete_cronjobs(&self, ids: &[String]) -> StoreResult<u64> {
        Ok(self.with(|s| {
            ids.iter()
                .filter(|id| s.cronjobs.remove(id.as_str()).is_some())
                .count() as u64
        }))
    }
}

#[async_trait]
impl MsgQueue for MemoryStore {
    async fn publish(&self, topic: &str, payload: JsonValue) -> StoreResult<()> {
        self.with(|s| {
            let id = s.queue.len() as i64 + 1;
            let message = QueueMessage {
                id,
                topic: topic.to_string(),
                payload,
                created_at: chrono::Utc::now(),
            };
            s.queue.push((message, false));
        });
        Ok(())
    }

    async fn consume(&self, topic: &str, limit: i64) -> StoreResult<Vec<QueueMessage>> {
        Ok(self.with(|s| {
            s.queue
                .iter_mut()
                .filter(|(m, consumed)| !*consumed && m.topic == topic)
                .take(limit.max(0) as usize)
                .map(|(m, consumed)| {
                    *consumed = true;
                    m.clone()
                })
                .collect()
        }))
    }
}

#[async_trait]
impl JobInfoStore for MemoryStore {
    async fn insert_job_info(&self, info: &JobInfo) -> StoreResult<()> {
        self.with(|s| s.job_infos.push(info.clone()));
        Ok(())
    }

    async fn list_job_infos(&self, workflow_name: Option<&str>) -> StoreResult<Vec<JobInfo>> {
        Ok(self.with(|s| {
            s.job_infos
                .iter()
                .rev()
                .filter(|i| workflow_name.is_none_or(|name| i.workflow_name == name))
                .cloned()
                .collect()
        }))
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn append_logs(
        &self,
        workflow_name: &str,
        task_id: i64,
        job_name: &str,
        entries: &[LogEntry],
    ) -> StoreResult<()> {
        self.with(|s| {
            s.logs
                .entry((workflow_name.to_string(), task_id, job_name.to_string()))
                .or_default()
                .extend_from_slice(entries);
        });
        Ok(())
    }

    async fn find_logs(
        &self,
        workflow_name: &str,
        task_id: i64,
        job_name: &str,
    ) -> StoreResult<Vec<LogEntry>> {
        Ok(self.with(|s| {
            s.logs
                .get(&(workflow_name.to_string(), task_id, job_name.to_string()))
                .cloned()
                .unwrap_or_default()
        }))
    }
}

#[async_trait]
impl RunnerStore for MemoryStore {
    async fn register_runner(&self, req: &RegisterRunner) -> StoreResult<Runner> {
        let now = chrono::Utc::now();
        Ok(self.with(|s| {
            let runner = s
                .runners
                .entry(req.runner_id.clone())
                .or_insert_with(|| Runner {
                    id: req.runner_id.clone(),
                    infrastructures: Vec::new(),
                    registered_at: now,
                    last_heartbeat_at: now,
                    status: RunnerStatus::Online,
                });
            runner.infrastructures = req.infrastructures.clone();
            runner.last_heartbeat_at = now;
            runner.status = RunnerStatus::Online;
            runner.clone()
        }))
    }

    async fn update_heartbeat(&self, runner_id: &str) -> StoreResult<bool> {
        Ok(self.with(|s| match s.runners.get_mut(runner_id) {
            Some(runner) => {
                runner.last_heartbeat_at = chrono::Utc::now();
                runner.status = RunnerStatus::Online;
                true
            }
            None => false,
        }))
    }

    async fn find_runner(&self, id: &str) -> StoreResult<Option<Runner>> {
        Ok(self.with(|s| s.runners.get(id).cloned()))
    }

    async fn list_runners(&self) -> StoreResult<Vec<Runner>> {
        Ok(self.with(|s| s.runners.values().cloned().collect()))
    }

    async fn delete_runner(&self, id: &str) -> StoreResult<bool> {
        Ok(self.with(|s| s.runners.remove(id).is_some()))
    }

    async fn mark_stale_runners_offline(&self, timeout_seconds: i64) -> StoreResult<u64> {
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(timeout_seconds);
        Ok(self.with(|s| {
            let mut count = 0;
            for runner in s.runners.values_mut() {
                if runner.last_heartbeat_at < cutoff && runner.status != RunnerStatus::Offline {
                    runner.status = RunnerStatus::Offline;
                    count += 1;
                }
            }
            count
        }))
    }
}

#[async_trait]
impl Catalog for MemoryStore {
    async fn get_record(&self, kind: CatalogKind, key: &str) -> StoreResult<Option<JsonValue>> {
        Ok(self.with(|s| s.catalog.get(&(kind, key.to_string())).cloned()))
    }

    async fn list_records(&self, kind: CatalogKind) -> StoreResult<Vec<JsonValue>> {
        Ok(self.with(|s| {
            s.catalog
                .iter()
                .filter(|((k, _), _)| *k == kind)
                .map(|(_, doc)| doc.clone())
                .collect()
        }))
    }

    async fn upsert_record(
        &self,
        kind: CatalogKind,
        key: &str,
        document: JsonValue,
    ) -> StoreResult<()> {
        self.with(|s| {
            s.catalog.insert((kind, key.to_string()), document);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_task_ids_are_sequential_per_workflow() {
        let store = MemoryStore::new();
        assert_eq!(store.next_task_id("a").await.unwrap(), 1);
        assert_eq!(store.next_task_id("a").await.unwrap(), 2);
        assert_eq!(store.next_task_id("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_queue_consumes_each_message_once() {
        let store = MemoryStore::new();
        store.publish("cronjob", json!({"n": 1})).await.unwrap();
        store.publish("other", json!({"n": 2})).await.unwrap();
        store.publish("cronjob", json!({"n": 3})).await.unwrap();

        let first = store.consume("cronjob", 10).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].payload["n"], 1);
        assert_eq!(first[1].payload["n"], 3);
        assert!(store.consume("cronjob", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_catalog_upsert_replaces() {
        let store = MemoryStore::new();
        store
            .upsert_record(CatalogKind::Registry, "r1", json!({"id": "r1", "v": 1}))
            .await
            .unwrap();
        store
            .upsert_record(CatalogKind::Registry, "r1", json!({"id": "r1", "v": 2}))
            .await
            .unwrap();

        let records = store.list_records(CatalogKind::Registry).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["v"], 2);
    }
}
