//! Data Transfer Objects for inter-service communication
//!
//! This module contains DTOs used for communication between Taskline
//! services (orchestrator, runner, CLI). DTOs are lightweight request and
//! response shapes optimized for network transfer.

pub mod dispatch;
pub mod log;
pub mod runner;
pub mod task;
