//! Append-only status log shared by a reporter and its background tasks.
//!
//! Entries are never removed or reordered. Readers always get a copy of a
//! consistent prefix: an entry is either fully visible or not at all.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use super::models::{LogEntry, LogPayload};

#[derive(Debug, Clone)]
pub struct LogBuffer {
    entries: Arc<Mutex<Vec<LogEntry>>>,
    start: Instant,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBuffer {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            start: Instant::now(),
        }
    }

    /// Append an entry stamped with the current time.
    pub fn append(&self, message: impl Into<String>, payload: LogPayload) {
        let entry = LogEntry {
            message: message.into(),
            payload,
            timestamp: self.start.elapsed().as_secs_f64(),
        };
        self.lock().push(entry);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.lock().clone()
    }

    // Push is the only mutation, so a poisoned buffer still holds a valid prefix.
    fn lock(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_append_preserves_order() {
        let buffer = LogBuffer::new();
        buffer.append("first", LogPayload::message(None));
        buffer.append("second", LogPayload::message(Some(json!(2))));
        buffer.append("third", LogPayload::message(None));

        let messages: Vec<_> = buffer
            .snapshot()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["first", "second", "third"]);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_snapshot_is_not_affected_by_later_appends() {
        let buffer = LogBuffer::new();
        buffer.append("a", LogPayload::message(None));

        let snapshot = buffer.snapshot();
        buffer.append("b", LogPayload::message(None));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_timestamps_do_not_go_backwards() {
        let buffer = LogBuffer::new();
        for i in 0..20 {
            buffer.append(format!("entry {}", i), LogPayload::message(None));
        }

        let entries = buffer.snapshot();
        assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_concurrent_appends_keep_every_entry() {
        let buffer = LogBuffer::new();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let buffer = buffer.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        buffer.append(format!("{}-{}", t, i), LogPayload::message(None));
                        let _ = buffer.snapshot();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(buffer.len(), 400);
    }
}
