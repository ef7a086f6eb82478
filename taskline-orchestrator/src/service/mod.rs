//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services orchestrate between repositories, the compiler and the task
//! scheduler.

pub mod cronjob;
pub mod log;
pub mod notify;
pub mod runner;
pub mod workflow_task;

pub use cronjob::CronjobService;
pub use log::LogService;
pub use notify::{NotifyService, WebhookNotifier};
pub use runner::RunnerService;
pub use workflow_task::WorkflowTaskService;
