use crate::logs::{LogSink, Severity};
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Default number of lines kept by a ring sink
const DEFAULT_CAPACITY: usize = 1000;

/// One line captured from a core
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub severity: Severity,
    pub tag: String,
    pub message: String,
}

/// Bounded in-memory buffer of the most recent core output
///
/// Meant for hosts that surface recent log lines to a user. Oldest lines are
/// dropped once `capacity` is reached.
pub struct RingSink {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl RingSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
        }
    }

    /// Snapshot of all buffered entries, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().iter().cloned().collect()
    }

    /// Messages written under `tag`, oldest first
    pub fn lines_for(&self, tag: &str) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|e| e.tag == tag)
            .map(|e| e.message.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<LogEntry>> {
        // A panicking writer cannot leave the queue half-updated
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for RingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for RingSink {
    fn write(&self, severity: Severity, tag: &str, message: &str) {
        let mut entries = self.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            timestamp: Local::now(),
            severity,
            tag: tag.to_string(),
            message: message.to_string(),
        });
    }
}
