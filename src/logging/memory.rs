//! In-memory capture sink.

use super::Logger;
use crate::event::{LogEvent, Record, Verdict};
use crate::telemetry::Telemetry;
use std::sync::{Arc, Mutex, MutexGuard};

/// Keeps every record it receives, in order.
///
/// Cloning shares the underlying buffer, so a test can keep one handle and give the
/// other to a component.
#[derive(Clone, Default)]
pub struct MemoryLogger {
    records: Arc<Mutex<Vec<Record>>>,
}

impl MemoryLogger {
    /// Empty capture buffer.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Record>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Snapshot of everything logged so far.
    pub fn records(&self) -> Vec<Record> {
        self.lock().clone()
    }

    /// Logged events, in order.
    pub fn events(&self) -> Vec<LogEvent> {
        self.lock()
            .iter()
            .filter_map(|r| r.as_event().cloned())
            .collect()
    }

    /// Logged telemetry samples, in order.
    pub fn telemetry(&self) -> Vec<Telemetry> {
        self.lock()
            .iter()
            .filter_map(|r| r.as_telemetry().cloned())
            .collect()
    }

    /// Number of logged events with the given verdict.
    pub fn count(&self, verdict: Verdict) -> usize {
        self.lock()
            .iter()
            .filter_map(Record::as_event)
            .filter(|e| e.verdict() == verdict)
            .count()
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been logged.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop everything captured so far.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Logger for MemoryLogger {
    fn log(&self, record: Record) {
        self.lock().push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_buffer() {
        let logger = MemoryLogger::new();
        let handle = logger.clone();

        logger.log(LogEvent::pass("a", 0.0, 1.0, 2.0).into());
        logger.log(LogEvent::fail("a", 0.0, 3.0, 2.0).into());
        logger.log(Telemetry::at("d", 0.0).into());

        assert_eq!(handle.len(), 3);
        assert_eq!(handle.events().len(), 2);
        assert_eq!(handle.telemetry().len(), 1);
        assert_eq!(handle.count(Verdict::Fail), 1);

        handle.clear();
        assert!(logger.is_empty());
    }
}
