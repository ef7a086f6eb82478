//! Log Service
//!
//! Business logic for job log management. Entries are persisted through
//! the `LogStore` and fanned out to live followers on a per-job broadcast
//! channel.

use std::sync::Arc;

use dashmap::DashMap;
use taskline_core::domain::log::{LogEntry, LogLevel};
use tokio::sync::broadcast;

use crate::repository::{LogStore, StoreError};

const MAX_MESSAGE_LENGTH: usize = 10_000;
const MAX_BATCH_SIZE: usize = 1000;
const FOLLOW_CAPACITY: usize = 1024;

/// Service error type
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("{0}")]
    ValidationError(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, LogError>;

type JobLogKey = (String, i64, String);

#[derive(Clone)]
pub struct LogService {
    store: Arc<dyn LogStore>,
    followers: Arc<DashMap<JobLogKey, broadcast::Sender<LogEntry>>>,
}

impl LogService {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self {
            store,
            followers: Arc::new(DashMap::new()),
        }
    }

    /// Add log entries for a job and push them to its followers
    pub async fn add_log_entries(
        &self,
        workflow_name: &str,
        task_id: i64,
        job_name: &str,
        entries: Vec<LogEntry>,
    ) -> Result<()> {
        validate_log_entries(&entries)?;

        if entries.is_empty() {
            return Ok(());
        }

        self.store
            .append_logs(workflow_name, task_id, job_name, &entries)
            .await?;

        let key = (workflow_name.to_string(), task_id, job_name.to_string());
        if let Some(sender) = self.followers.get(&key) {
            for entry in entries.iter() {
                // No receivers left is fine, the stream just closed
                let _ = sender.send(entry.clone());
            }
        }

        tracing::debug!(
            "Added {} log entries for {}#{} job {}",
            entries.len(),
            workflow_name,
            task_id,
            job_name
        );

        Ok(())
    }

    /// Convenience for controllers running inside the orchestrator
    pub async fn write(
        &self,
        workflow_name: &str,
        task_id: i64,
        job_name: &str,
        level: LogLevel,
        message: impl Into<String>,
    ) {
        let entry = LogEntry::new(level, message);
        if let Err(e) = self
            .add_log_entries(workflow_name, task_id, job_name, vec![entry])
            .await
        {
            tracing::warn!("Failed to write log for job {}: {}", job_name, e);
        }
    }

    /// Get all log entries for a job
    pub async fn get_job_logs(
        &self,
        workflow_name: &str,
        task_id: i64,
        job_name: &str,
    ) -> Result<Vec<LogEntry>> {
        Ok(self.store.find_logs(workflow_name, task_id, job_name).await?)
    }

    /// Receiver for entries written after this call
    pub fn follow(
        &self,
        workflow_name: &str,
        task_id: i64,
        job_name: &str,
    ) -> broadcast::Receiver<LogEntry> {
        let key = (workflow_name.to_string(), task_id, job_name.to_string());
        self.followers
            .entry(key)
            .or_insert_with(|| broadcast::channel(FOLLOW_CAPACITY).0)
            .subscribe()
    }

    /// Drops the channels of a finished task, ending every follow stream
    pub fn close_task(&self, workflow_name: &str, task_id: i64) {
        self.followers
            .retain(|(wf, id, _), _| !(wf == workflow_name && *id == task_id));
    }
}

// =============================================================================
// Validation
// =============================================================================

fn validate_log_entries(entries: &[LogEntry]) -> Result<()> {
    if entries.len() > MAX_BATCH_SIZE {
        return Err(LogError::ValidationError(format!(
            "Too many log entries in batch (max: {})",
            MAX_BATCH_SIZE
        )));
    }

    for (i, entry) in entries.iter().enumerate() {
        if entry.message.len() > MAX_MESSAGE_LENGTH {
            return Err(LogError::ValidationError(format!(
                "Log entry {} message too long (max: {} chars)",
                i, MAX_MESSAGE_LENGTH
            )));
        }
    }

    Ok(())
}
