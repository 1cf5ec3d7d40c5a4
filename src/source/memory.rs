//! In-memory log source with scripted failures

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{LogEntry, LogPredicate, LogSource};
use crate::cursor::Clock;
use crate::error::{CollectorError, Result};

#[derive(Default)]
struct Inner {
    entries: Vec<LogEntry>,
    failures: VecDeque<CollectorError>,
    queries: Vec<DateTime<Utc>>,
}

/// Log source backed by a shared in-memory store.
///
/// Clones share the same store, so a test can keep one handle while the
/// collector owns another.
#[derive(Clone, Default)]
pub struct MemoryLogSource {
    inner: Arc<Mutex<Inner>>,
    clock: Option<Arc<dyn Clock>>,
}

impl MemoryLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every query's window by the clock's current instant.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn push(&self, entry: LogEntry) {
        self.lock().entries.push(entry);
    }

    /// Make the next query fail with `error`.
    pub fn fail_next(&self, error: CollectorError) {
        self.lock().failures.push_back(error);
    }

    /// Start positions of every query issued so far, including failed ones.
    pub fn queries(&self) -> Vec<DateTime<Utc>> {
        self.lock().queries.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned store only means a test panicked mid-push
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LogSource for MemoryLogSource {
    fn name(&self) -> &str {
        "memory"
    }

    fn query(
        &mut self,
        start: DateTime<Utc>,
        predicate: Option<&LogPredicate>,
    ) -> Result<Vec<LogEntry>> {
        let end = self.clock.as_ref().map(|c| c.now());
        let mut inner = self.lock();
        inner.queries.push(start);

        if let Some(err) = inner.failures.pop_front() {
            return Err(err);
        }

        let mut entries: Vec<LogEntry> = inner
            .entries
            .iter()
            .filter(|entry| {
                let ts = entry.timestamp();
                ts >= start && end.map_or(true, |end| ts <= end)
            })
            .filter(|entry| match (entry, predicate) {
                (_, None) => true,
                (LogEntry::Log(record), Some(p)) => p.matches(record),
                // Non-message entries carry no subsystem to match on
                (LogEntry::Other(_), Some(_)) => false,
            })
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.timestamp());
        Ok(entries)
    }
}
