//! Log sources - query the host log store by start position and predicate
//!
//! `UnifiedLogSource` talks to the macOS unified log through the `log` tool.
//! `MemoryLogSource` serves scripted entries and is used by tests.

mod memory;
mod unified_log;

pub use memory::MemoryLogSource;
pub use unified_log::{parse_ndjson, UnifiedLogSource};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A single entry returned by the log store.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    /// Regular log message with a composed message
    Log(LogRecord),
    /// Activity, signpost, trace and other non-message entries
    Other(OtherEntry),
}

impl LogEntry {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LogEntry::Log(record) => record.timestamp,
            LogEntry::Other(other) => other.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    /// Process name (not the full image path)
    pub process: String,
    pub process_id: u32,
    pub subsystem: String,
    pub category: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OtherEntry {
    pub timestamp: DateTime<Utc>,
    /// Store-specific kind, e.g. `activityCreateEvent` or `signpostEvent`
    pub kind: String,
    pub description: String,
}

/// Filter predicate evaluated by the log store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogPredicate {
    /// Subsystem contains the substring, ignoring case
    SubsystemContains(String),
    /// Entries emitted by one process id (0 is the kernel)
    ProcessId(u32),
}

impl LogPredicate {
    /// Render in the log store's predicate syntax.
    pub fn render(&self) -> String {
        match self {
            LogPredicate::SubsystemContains(needle) => {
                let escaped = needle.replace('\\', "\\\\").replace('"', "\\\"");
                format!("subsystem CONTAINS[c] \"{}\"", escaped)
            }
            LogPredicate::ProcessId(pid) => format!("processID == {}", pid),
        }
    }

    /// Evaluate against a record in memory with the same semantics as `render`.
    pub fn matches(&self, record: &LogRecord) -> bool {
        match self {
            LogPredicate::SubsystemContains(needle) => record
                .subsystem
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            LogPredicate::ProcessId(pid) => record.process_id == *pid,
        }
    }
}

/// Which part of the log store a source may read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogScope {
    /// Whole system; needs admin privilege on most hosts
    #[default]
    System,
    /// Only entries written by the collector process itself
    CurrentProcess,
}

/// Read-only query capability over the host log store.
///
/// Implementations return entries in `[start, now]` ordered by timestamp
/// ascending. Failures map to `SourceUnavailable` when the store itself cannot
/// be reached and `QueryFailed` for everything scoped to one query.
pub trait LogSource: Send {
    fn name(&self) -> &str;

    fn query(
        &mut self,
        start: DateTime<Utc>,
        predicate: Option<&LogPredicate>,
    ) -> Result<Vec<LogEntry>>;
}
