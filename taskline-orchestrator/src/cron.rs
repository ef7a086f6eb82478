//! Cron scheduler
//!
//! Keeps an in-memory table of the enabled cronjobs, fed at start from the
//! store and afterwards from `cronjob` queue messages, and triggers a new
//! workflow task whenever a schedule comes due.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use croner::Cron;
use taskline_core::domain::cronjob::{Cronjob, CronjobAction, CronjobParent, CronjobPayload};
use taskline_core::domain::workflow::WorkflowDefinition;
use tokio_util::sync::CancellationToken;

use crate::repository::{CronjobStore, MsgQueue, StoreError};
use crate::service::cronjob::CRONJOB_TOPIC;
use crate::service::workflow_task::WorkflowTaskError;

pub const CRON_CREATOR: &str = "cron";

const QUEUE_BATCH: i64 = 100;

/// Starts workflow tasks on behalf of the scheduler
#[async_trait]
pub trait TaskTrigger: Send + Sync {
    async fn trigger(
        &self,
        workflow_name: &str,
        args: Option<WorkflowDefinition>,
        creator: &str,
    ) -> Result<i64, WorkflowTaskError>;
}

struct Entry {
    cronjob: Cronjob,
    cron: Cron,
    next: Option<DateTime<Utc>>,
}

/// Schedules by cronjob ID
#[derive(Default)]
pub struct CronTable {
    entries: HashMap<String, Entry>,
}

impl CronTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Adds or replaces a cronjob; disabled or unparsable ones are dropped
    pub fn upsert(&mut self, cronjob: Cronjob, now: DateTime<Utc>) {
        if !cronjob.schedule.enabled {
            self.entries.remove(&cronjob.id);
            return;
        }
        let cron = match cronjob
            .schedule
            .cron_expression()
            .map_err(|e| e.to_string())
            .and_then(|expr| Cron::new(&expr).parse().map_err(|e| e.to_string()))
        {
            Ok(cron) => cron,
            Err(e) => {
                tracing::warn!("Skipping cronjob {} of {}: {}", cronjob.id, cronjob.name, e);
                self.entries.remove(&cronjob.id);
                return;
            }
        };
        let next = cron.find_next_occurrence(&now, false).ok();
        self.entries.insert(cronjob.id.clone(), Entry { cronjob, cron, next });
    }

    pub fn apply(&mut self, payload: CronjobPayload, now: DateTime<Utc>) {
        for id in &payload.delete_list {
            self.entries.remove(id);
        }
        match payload.action {
            CronjobAction::Enable => {
                for cronjob in payload.job_list {
                    self.upsert(cronjob, now);
                }
            }
            CronjobAction::Disable => {
                self.entries.retain(|_, entry| {
                    !(entry.cronjob.name == payload.name && entry.cronjob.parent_type == payload.job_type)
                });
            }
        }
        tracing::debug!("Cron table holds {} schedules after {:?} of {}", self.len(), payload.action, payload.name);
    }

    /// Cronjobs due at `now`; their next occurrence is moved past it
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<Cronjob> {
        let mut due = Vec::new();
        for entry in self.entries.values_mut() {
            if entry.next.is_some_and(|next| next <= now) {
                due.push(entry.cronjob.clone());
                entry.next = entry.cron.find_next_occurrence(&now, false).ok();
            }
        }
        due
    }
}

pub struct CronScheduler {
    cronjobs: Arc<dyn CronjobStore>,
    queue: Arc<dyn MsgQueue>,
    trigger: Arc<dyn TaskTrigger>,
    tick: Duration,
    queue_poll: Duration,
    table: CronTable,
}

impl CronScheduler {
    pub fn new(
        cronjobs: Arc<dyn CronjobStore>,
        queue: Arc<dyn MsgQueue>,
        trigger: Arc<dyn TaskTrigger>,
        tick: Duration,
        queue_poll: Duration,
    ) -> Self {
        Self {
            cronjobs,
            queue,
            trigger,
            tick,
            queue_poll,
            table: CronTable::new(),
        }
    }

    async fn load(&mut self) -> Result<(), StoreError> {
        let now = Utc::now();
        for cronjob in self.cronjobs.list_enabled_cronjobs().await? {
            self.table.upsert(cronjob, now);
        }
        tracing::info!("Cron scheduler loaded {} schedules", self.table.len());
        Ok(())
    }

    async fn consume(&mut self) {
        let messages = match self.queue.consume(CRONJOB_TOPIC, QUEUE_BATCH).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!("Failed to read the cronjob topic: {}", e);
                return;
            }
        };
        for message in messages {
            match serde_json::from_value::<CronjobPayload>(message.payload) {
                Ok(payload) => self.table.apply(payload, Utc::now()),
                Err(e) => tracing::warn!("Dropping malformed cronjob message {}: {}", message.id, e),
            }
        }
    }

    fn fire(&mut self, now: DateTime<Utc>) {
        for cronjob in self.table.take_due(now) {
            if cronjob.parent_type != CronjobParent::Workflow {
                tracing::debug!(
                    "No trigger for {} cronjob {}",
                    cronjob.parent_type.as_str(),
                    cronjob.id
                );
                continue;
            }
            let trigger = self.trigger.clone();
            tokio::spawn(async move {
                match trigger
                    .trigger(&cronjob.name, cronjob.schedule.workflow_args.clone(), CRON_CREATOR)
                    .await
                {
                    Ok(task_id) => tracing::info!(
                        "Cronjob {} started task {}#{}",
                        cronjob.id,
                        cronjob.name,
                        task_id
                    ),
                    Err(e) => tracing::error!("Cronjob {} failed to start {}: {}", cronjob.id, cronjob.name, e),
                }
            });
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        if let Err(e) = self.load().await {
            tracing::error!("Failed to load cronjobs: {}", e);
        }
        let mut tick = tokio::time::interval(self.tick);
        let mut poll = tokio::time::interval(self.queue_poll);
        loop {
            tokio::select! {
                _ = tick.tick() => self.fire(Utc::now()),
                _ = poll.tick() => self.consume().await,
                _ = shutdown.cancelled() => break,
            }
        }
        tracing::info!("Cron scheduler stopped");
    }
}
