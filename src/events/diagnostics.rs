//! Diagnostic feed
//!
//! A bounded, in-memory list of human readable lines describing every state
//! transition, retry and error. Newest last; the oldest line is evicted once
//! the capacity is reached. Nothing is persisted.

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Default number of retained lines
pub const DEFAULT_CAPACITY: usize = 200;

pub struct DiagnosticLog {
    capacity: usize,
    entries: Mutex<VecDeque<String>>,
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `message` prefixed with the current UTC time
    pub fn record(&self, message: impl AsRef<str>) {
        let line = format!(
            "{} {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            message.as_ref()
        );
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(line);
    }

    /// Snapshot, oldest first
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Most recent line
    pub fn last(&self) -> Option<String> {
        self.entries.lock().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
