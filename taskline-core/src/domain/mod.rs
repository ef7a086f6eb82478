//! Core domain types
//!
//! This module contains the core domain structures used across Taskline services.
//! Workflow definitions are the immutable templates users save; tasks are the
//! compiled, executing instances the orchestrator schedules and the runner
//! reports against.

pub mod catalog;
pub mod common;
pub mod cronjob;
pub mod job;
pub mod job_info;
pub mod log;
pub mod runner;
pub mod status;
pub mod step;
pub mod task;
pub mod workflow;
