//! Taskline Core
//!
//! Core types and abstractions for the Taskline workflow engine.
//!
//! This crate contains:
//! - Domain types: workflow definitions, job specs, compiled tasks and steps
//! - The per-task global context and the output placeholder conventions
//! - DTOs: Data transfer objects for inter-service communication

pub mod context;
pub mod domain;
pub mod dto;
pub mod output;

pub use context::GlobalContext;
