//! Log DTOs for inter-service communication

use serde::{Deserialize, Serialize};

use crate::domain::log::LogEntry;

/// Log batch sent from runner to orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogBatch {
    pub entries: Vec<LogEntry>,
}
