//! Risk events - normalized records forwarded to EDR/XDR pipelines

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::filter::BenignPhraseFilter;
use crate::source::{LogEntry, LogRecord};

/// Risk event as written to the output artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskEvent {
    /// ISO8601 时间戳（UTC）
    pub date: String,
    pub process: String,
    pub subsystem: String,
    pub category: String,
    pub message: String,
}

impl RiskEvent {
    pub fn from_record(record: &LogRecord) -> Self {
        Self {
            date: format_date(record.timestamp),
            process: record.process.clone(),
            subsystem: record.subsystem.clone(),
            category: record.category.clone(),
            message: record.message.clone(),
        }
    }
}

/// ISO8601 with a `Z` designator and whole seconds, e.g. `2024-05-01T12:00:00Z`.
pub fn format_date(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Keep log messages that are not benign, in source order.
pub fn select_risk_events(entries: &[LogEntry], filter: &BenignPhraseFilter) -> Vec<RiskEvent> {
    entries
        .iter()
        .filter_map(|entry| match entry {
            LogEntry::Log(record) => Some(record),
            LogEntry::Other(_) => None,
        })
        .filter(|record| match filter.matching_phrase(&record.message) {
            Some(phrase) => {
                debug!(process = %record.process, phrase, "Skipping benign message");
                false
            }
            None => true,
        })
        .map(RiskEvent::from_record)
        .collect()
}
