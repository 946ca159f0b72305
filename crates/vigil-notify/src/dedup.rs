//! Identifiers already confirmed delivered to the sink.

use std::collections::HashSet;
use std::sync::Mutex;
use vigil_types::ClassifiedEvent;

/// Process-wide set of record identifiers already forwarded to the sink.
///
/// Grows monotonically; only [`DedupStore::clear`] removes entries. Not
/// persisted, so a restart forgets everything.
///
/// Uses `std::sync::Mutex`: every critical section is a short set operation
/// that never spans an `.await`.
#[derive(Debug, Default)]
pub struct DedupStore {
    sent: Mutex<HashSet<i64>>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the records whose identifiers have not been marked sent,
    /// preserving input order.
    pub fn unsent(&self, records: Vec<ClassifiedEvent>) -> Vec<ClassifiedEvent> {
        let sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
        records
            .into_iter()
            .filter(|record| !sent.contains(&record.id))
            .collect()
    }

    /// Marks every record as sent. Returns how many were newly inserted.
    pub fn mark_sent<'a>(&self, records: impl IntoIterator<Item = &'a ClassifiedEvent>) -> usize {
        let mut sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
        records
            .into_iter()
            .filter(|record| sent.insert(record.id))
            .count()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&id)
    }

    pub fn len(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every identifier, making previously sent records eligible
    /// again. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
        let dropped = sent.len();
        sent.clear();
        dropped
    }
}
