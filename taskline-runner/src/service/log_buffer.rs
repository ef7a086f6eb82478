//! Log buffer service
//!
//! Collects job log entries while steps run. The poller drains the buffer
//! on an interval, or early once it grows past the configured size, and
//! ships the batch to the orchestrator.

use std::sync::{Arc, Mutex, PoisonError};

use taskline_core::domain::log::LogEntry;
use tokio::sync::Notify;

pub trait LogBufferService: Send + Sync {
    fn add_entry(&self, entry: LogEntry);

    /// Returns all buffered entries and clears the buffer
    fn drain(&self) -> Vec<LogEntry>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory implementation of LogBufferService
///
/// Wakes `full` whenever the buffer reaches `capacity` entries so the
/// sender does not wait for its next tick.
#[derive(Clone)]
pub struct InMemoryLogBuffer {
    buffer: Arc<Mutex<Vec<LogEntry>>>,
    capacity: usize,
    full: Arc<Notify>,
}

impl InMemoryLogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            full: Arc::new(Notify::new()),
        }
    }

    /// Resolves once the buffer reached its capacity
    pub async fn filled(&self) {
        self.full.notified().await
    }
}

impl Default for InMemoryLogBuffer {
    fn default() -> Self {
        Self::new(100)
    }
}

impl LogBufferService for InMemoryLogBuffer {
    fn add_entry(&self, entry: LogEntry) {
        let len = {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            buffer.push(entry);
            buffer.len()
        };
        if len >= self.capacity {
            self.full.notify_one();
        }
    }

    fn drain(&self) -> Vec<LogEntry> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.drain(..).collect()
    }

    fn len(&self) -> usize {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use taskline_core::domain::log::LogLevel;

    #[test]
    fn test_drain_empties_buffer() {
        let buffer = InMemoryLogBuffer::new(10);
        buffer.add_entry(LogEntry::new(LogLevel::Info, "one"));
        buffer.add_entry(LogEntry::for_step(LogLevel::Error, "build", "two"));

        let drained = buffer.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].step.as_deref(), Some("build"));
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_filled_wakes_at_capacity() {
        let buffer = InMemoryLogBuffer::new(2);
        buffer.add_entry(LogEntry::new(LogLevel::Info, "one"));
        buffer.add_entry(LogEntry::new(LogLevel::Info, "two"));

        tokio::time::timeout(Duration::from_secs(1), buffer.filled())
            .await
            .expect("capacity reached should notify");
    }
}
