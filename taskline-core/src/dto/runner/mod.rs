//! Runner DTOs
//!
//! Data transfer objects for runner-related operations.

use serde::{Deserialize, Serialize};

use crate::domain::common::Infrastructure;

/// Request to register a runner with the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRunner {
    /// Unique identifier for the runner
    pub runner_id: String,

    /// Infrastructures this runner executes job tasks for
    pub infrastructures: Vec<Infrastructure>,
}
