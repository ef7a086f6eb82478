//! Runner domain model
//!
//! Represents a remote executor that claims dispatched job tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::common::Infrastructure;

/// A runner that can execute job tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    /// Unique identifier for the runner
    pub id: String,

    /// Infrastructures this runner accepts work for
    #[serde(default)]
    pub infrastructures: Vec<Infrastructure>,

    /// When this runner was first registered
    pub registered_at: DateTime<Utc>,

    /// Last time this runner sent a heartbeat
    pub last_heartbeat_at: DateTime<Utc>,

    /// Current status of the runner
    pub status: RunnerStatus,
}

/// Status of a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerStatus {
    /// Runner is online and ready to accept jobs
    Online,

    /// Runner hasn't sent a heartbeat recently
    Offline,
}

impl RunnerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerStatus::Online => "Online",
            RunnerStatus::Offline => "Offline",
        }
    }
}

impl std::fmt::Display for RunnerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
