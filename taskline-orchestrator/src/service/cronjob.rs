//! Cronjob Service
//!
//! Reconciles the schedules saved on a workflow with the persisted
//! cronjobs and announces every change on the `cronjob` queue topic,
//! where the cron scheduler picks it up.

use std::sync::Arc;

use taskline_core::domain::cronjob::{
    Cronjob, CronjobAction, CronjobParent, CronjobPayload, ScheduleCtrl,
};
use taskline_core::domain::workflow::WorkflowDefinition;
use uuid::Uuid;

use crate::repository::{CronjobStore, MsgQueue, StoreError};

pub const CRONJOB_TOPIC: &str = "cronjob";

#[derive(Debug, thiserror::Error)]
pub enum CronjobError {
    #[error("{0}")]
    ValidationError(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode cronjob payload: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CronjobError>;

#[derive(Clone)]
pub struct CronjobService {
    store: Arc<dyn CronjobStore>,
    queue: Arc<dyn MsgQueue>,
}

impl CronjobService {
    pub fn new(store: Arc<dyn CronjobStore>, queue: Arc<dyn MsgQueue>) -> Self {
        Self { store, queue }
    }

    /// Brings the cronjobs of a parent in line with its schedule items
    ///
    /// Items carrying the ID of an existing cronjob update it, items
    /// without one become new cronjobs (their ID is written back), and
    /// cronjobs no item mentions are deleted. Returns the deleted IDs.
    pub async fn update_cronjob(
        &self,
        parent_name: &str,
        parent_type: CronjobParent,
        product_name: &str,
        schedule: &mut ScheduleCtrl,
    ) -> Result<Vec<String>> {
        for item in &schedule.items {
            item.schedule
                .cron_expression()
                .map_err(|e| CronjobError::ValidationError(e.to_string()))?;
        }

        let existing = self.store.list_cronjobs(parent_name, parent_type).await?;
        let product_name = if parent_type == CronjobParent::Testing {
            product_name.to_string()
        } else {
            String::new()
        };

        let mut kept = Vec::new();
        for item in schedule.items.iter_mut() {
            let mut cronjob = Cronjob {
                id: String::new(),
                name: parent_name.to_string(),
                parent_type,
                product_name: product_name.clone(),
                schedule: item.schedule.clone(),
            };
            cronjob.schedule.enabled = schedule.enabled;

            match item.id.as_deref().filter(|id| existing.iter().any(|c| c.id == *id)) {
                Some(id) => {
                    cronjob.id = id.to_string();
                    self.store.update_cronjob(&cronjob).await?;
                }
                None => {
                    cronjob.id = Uuid::new_v4().to_string();
                    self.store.create_cronjob(&cronjob).await?;
                    item.id = Some(cronjob.id.clone());
                }
            }
            kept.push(cronjob.id);
        }

        let delete_list: Vec<String> = existing
            .into_iter()
            .map(|c| c.id)
            .filter(|id| !kept.contains(id))
            .collect();
        if !delete_list.is_empty() {
            self.store.delete_cronjobs(&delete_list).await?;
        }

        tracing::debug!(
            "Cronjobs of {} {}: {} kept, {} deleted",
            parent_type.as_str(),
            parent_name,
            kept.len(),
            delete_list.len()
        );
        Ok(delete_list)
    }

    /// Reconciles a saved workflow's schedules and announces the result
    pub async fn handle_cronjob(&self, workflow: &mut WorkflowDefinition) -> Result<()> {
        let enabled = workflow.schedule_enabled
            && workflow.schedules.as_ref().is_some_and(|s| s.enabled);

        let payload = if enabled {
            let mut schedules = workflow.schedules.take().unwrap_or_default();
            let result = self
                .update_cronjob(&workflow.name, CronjobParent::Workflow, &workflow.project, &mut schedules)
                .await;
            workflow.schedules = Some(schedules);
            let delete_list = result?;

            CronjobPayload {
                name: workflow.name.clone(),
                job_type: CronjobParent::Workflow,
                action: CronjobAction::Enable,
                delete_list,
                job_list: self
                    .store
                    .list_cronjobs(&workflow.name, CronjobParent::Workflow)
                    .await?,
            }
        } else {
            CronjobPayload {
                name: workflow.name.clone(),
                job_type: CronjobParent::Workflow,
                action: CronjobAction::Disable,
                delete_list: Vec::new(),
                job_list: Vec::new(),
            }
        };
        self.publish(&payload).await
    }

    /// Removes every cronjob of a parent
    pub async fn delete_cronjob(&self, parent_name: &str, parent_type: CronjobParent) -> Result<()> {
        let delete_list: Vec<String> = self
            .store
            .list_cronjobs(parent_name, parent_type)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        if !delete_list.is_empty() {
            self.store.delete_cronjobs(&delete_list).await?;
        }
        self.publish(&CronjobPayload {
            name: parent_name.to_string(),
            job_type: parent_type,
            action: CronjobAction::Disable,
            delete_list,
            job_list: Vec::new(),
        })
        .await
    }

    async fn publish(&self, payload: &CronjobPayload) -> Result<()> {
        self.queue
            .publish(CRONJOB_TOPIC, serde_json::to_value(payload)?)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskline_core::domain::cronjob::{Frequency, Schedule, ScheduleItem, ScheduleType};

    use crate::repository::MemoryStore;

    fn gap(minutes: u64) -> Schedule {
        Schedule {
            schedule_type: ScheduleType::Gap,
            number: minutes,
            frequency: Frequency::Minutes,
            enabled: true,
            ..Default::default()
        }
    }

    fn service(store: &Arc<MemoryStore>) -> CronjobService {
        CronjobService::new(store.clone(), store.clone())
    }

    #[tokio::test]
    async fn test_reconcile_updates_creates_and_deletes() {
        let store = Arc::new(MemoryStore::new());
        let cronjobs = service(&store);

        let mut first = ScheduleCtrl {
            enabled: true,
            items: vec![
                ScheduleItem { id: None, schedule: gap(5) },
                ScheduleItem { id: None, schedule: gap(10) },
            ],
        };
        let deleted = cronjobs
            .update_cronjob("nightly", CronjobParent::Workflow, "", &mut first)
            .await
            .unwrap();
        assert!(deleted.is_empty());
        let a = first.items[0].id.clone().unwrap();
        let b = first.items[1].id.clone().unwrap();

        let mut second = ScheduleCtrl {
            enabled: true,
            items: vec![
                ScheduleItem { id: Some(a.clone()), schedule: gap(15) },
                ScheduleItem { id: None, schedule: gap(30) },
            ],
        };
        let deleted = cronjobs
            .update_cronjob("nightly", CronjobParent::Workflow, "", &mut second)
            .await
            .unwrap();
        assert_eq!(deleted, vec![b]);

        let stored = store.list_cronjobs("nightly", CronjobParent::Workflow).await.unwrap();
        assert_eq!(stored.len(), 2);
        let updated = stored.iter().find(|c| c.id == a).unwrap();
        assert_eq!(updated.schedule.number, 15);
        let c = second.items[1].id.clone().unwrap();
        assert!(stored.iter().any(|job| job.id == c));
    }

    #[tokio::test]
    async fn test_testing_parent_keeps_product_name() {
        let store = Arc::new(MemoryStore::new());
        let mut ctrl = ScheduleCtrl {
            enabled: true,
            items: vec![ScheduleItem { id: None, schedule: gap(5) }],
        };
        service(&store)
            .update_cronjob("smoke", CronjobParent::Testing, "shop", &mut ctrl)
            .await
            .unwrap();

        let stored = store.list_cronjobs("smoke", CronjobParent::Testing).await.unwrap();
        assert_eq!(stored[0].product_name, "shop");
    }

    #[tokio::test]
    async fn test_invalid_schedule_rejected() {
        let store = Arc::new(MemoryStore::new());
        let mut ctrl = ScheduleCtrl {
            enabled: true,
            items: vec![ScheduleItem { id: None, schedule: gap(0) }],
        };
        let result = service(&store)
            .update_cronjob("nightly", CronjobParent::Workflow, "", &mut ctrl)
            .await;
        assert!(matches!(result, Err(CronjobError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_disabled_workflow_publishes_disable() {
        let store = Arc::new(MemoryStore::new());
        let mut workflow = WorkflowDefinition {
            name: "nightly".to_string(),
            ..Default::default()
        };
        service(&store).handle_cronjob(&mut workflow).await.unwrap();

        let messages = store.consume(CRONJOB_TOPIC, 10).await.unwrap();
        let payload: CronjobPayload = serde_json::from_value(messages[0].payload.clone()).unwrap();
        assert_eq!(payload.action, CronjobAction::Disable);
        assert_eq!(payload.name, "nightly");
    }

    #[tokio::test]
    async fn test_enabled_workflow_publishes_job_list() {
        let store = Arc::new(MemoryStore::new());
        let mut workflow = WorkflowDefinition {
            name: "nightly".to_string(),
            schedule_enabled: true,
            schedules: Some(ScheduleCtrl {
                enabled: true,
                items: vec![ScheduleItem { id: None, schedule: gap(5) }],
            }),
            ..Default::default()
        };
        service(&store).handle_cronjob(&mut workflow).await.unwrap();

        assert!(workflow.schedules.as_ref().unwrap().items[0].id.is_some());
        let messages = store.consume(CRONJOB_TOPIC, 10).await.unwrap();
        let payload: CronjobPayload = serde_json::from_value(messages[0].payload.clone()).unwrap();
        assert_eq!(payload.action, CronjobAction::Enable);
        assert_eq!(payload.job_list.len(), 1);
    }
}
