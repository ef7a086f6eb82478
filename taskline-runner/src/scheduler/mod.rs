//! Scheduler layer for the runner
//!
//! This layer claims job tasks from the orchestrator's dispatch queue and
//! coordinates their execution, from claim to completion report.

pub mod poller;

pub use poller::JobPoller;
