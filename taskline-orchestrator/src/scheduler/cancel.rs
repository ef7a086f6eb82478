//! Cancellation registry
//!
//! One `CancellationToken` per running workflow task. The API trips it;
//! the scheduler and the job controllers of the task observe it.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
pub struct CancelRegistry {
    tokens: Arc<DashMap<(String, i64), CancellationToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, workflow_name: &str, task_id: i64) -> CancellationToken {
        self.tokens
            .entry((workflow_name.to_string(), task_id))
            .or_default()
            .clone()
    }

    /// Trips the task's token; false when the task is not running
    pub fn cancel(&self, workflow_name: &str, task_id: i64) -> bool {
        match self.tokens.get(&(workflow_name.to_string(), task_id)) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, workflow_name: &str, task_id: i64) {
        self.tokens.remove(&(workflow_name.to_string(), task_id));
    }

    pub fn is_running(&self, workflow_name: &str, task_id: i64) -> bool {
        self.tokens.contains_key(&(workflow_name.to_string(), task_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_trips_registered_token() {
        let registry = CancelRegistry::new();
        let token = registry.register("release", 4);

        assert!(registry.cancel("release", 4));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_unknown_task() {
        let registry = CancelRegistry::new();
        registry.register("release", 4);
        registry.remove("release", 4);

        assert!(!registry.cancel("release", 4));
        assert!(!registry.is_running("release", 4));
    }
}
