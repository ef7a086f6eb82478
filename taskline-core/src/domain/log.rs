//! Log domain types

use serde::{Deserialize, Serialize};

/// A log entry from job execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: LogLevel,
    /// Step that produced the line, if any
    #[serde(default)]
    pub step: Option<String>,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            level,
            step: None,
            message: message.into(),
        }
    }

    pub fn for_step(level: LogLevel, step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: Some(step.into()),
            ..Self::new(level, message)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}
