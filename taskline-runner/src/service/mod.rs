//! Service layer
//!
//! Services contain the runner's business logic: executing a dispatched
//! job's steps and buffering its log until the poller ships it.
//!
//! Both are trait-based so the poller and tests can swap implementations.

mod execution;
mod log_buffer;

// Re-export traits
pub use execution::{ExecutionService, JobReporter};
pub use log_buffer::LogBufferService;

// Re-export implementations
pub use execution::StandardExecutionService;
pub use log_buffer::InMemoryLogBuffer;
