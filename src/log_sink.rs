//! # Status Log Sink
//!
//! The engine reports every ingestion attempt as one human-readable line. Where those
//! lines go is up to the host: [`RingLog`] keeps the last few hundred in memory for a
//! diagnostics view and mirrors them to the `log` facade.

use chrono::{SecondsFormat, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Lines retained by [`RingLog`] before the oldest is dropped
pub const RING_CAPACITY: usize = 200;

/// Receiver for engine status lines.
pub trait LogSink: Send {
    fn record(&mut self, line: &str);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn record(&mut self, _line: &str) {}
}

/// Shared, bounded, timestamped log buffer.
///
/// Clones share the same buffer, so the host can keep one handle for dumping
/// while the engine owns another.
#[derive(Debug, Clone)]
pub struct RingLog {
    entries: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl Default for RingLog {
    fn default() -> Self {
        Self::with_capacity(RING_CAPACITY)
    }
}

impl RingLog {
    pub fn with_capacity(capacity: usize) -> Self {
        RingLog {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// All retained lines, oldest first, joined by newlines.
    pub fn dump(&self) -> String {
        self.lines().join("\n")
    }

    pub fn lines(&self) -> Vec<String> {
        match self.entries.lock() {
            Ok(entries) => entries.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogSink for RingLog {
    fn record(&mut self, line: &str) {
        log::info!("{}", line);

        let stamped = format!(
            "{}: {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            line
        );
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(stamped);
    }
}
