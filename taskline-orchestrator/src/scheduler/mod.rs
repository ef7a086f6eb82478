//! Workflow task scheduler
//!
//! Runs a compiled task stage by stage, applies each job's error policy,
//! and carries cancellation and operator decisions to the jobs.

pub mod cancel;
pub mod decision;
pub mod handle;
pub mod task;

pub use cancel::CancelRegistry;
pub use decision::{Decision, DecisionBoard, DecisionError, DecisionKey};
pub use handle::TaskHandle;
pub use task::TaskScheduler;
