//! In-memory logger that records every event.

use std::fmt::Arguments;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::log::{LogLevel, Logger};

/// Records `(level, message)` pairs so tests can assert on emitted events.
///
/// Cloning shares the underlying buffer, so a test can keep one clone and hand
/// another to the component under test.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogger {
    events: Arc<Mutex<Vec<(LogLevel, String)>>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events recorded so far, oldest first.
    pub fn events(&self) -> Vec<(LogLevel, String)> {
        self.events.lock().clone()
    }

    /// Messages recorded at exactly `level`.
    pub fn messages_at(&self, level: LogLevel) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Whether any recorded message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.events.lock().iter().any(|(_, m)| m.contains(needle))
    }

    /// Number of recorded messages containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(_, m)| m.contains(needle))
            .count()
    }
}

impl Logger for MemoryLogger {
    fn log(&self, level: LogLevel, args: Arguments<'_>) {
        self.events.lock().push((level, args.to_string()));
    }
}
