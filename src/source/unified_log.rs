//! macOS unified log source - wraps `log show --style ndjson`

use std::fmt::Display;
use std::path::PathBuf;
use std::process::Command;

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{LogEntry, LogPredicate, LogRecord, LogScope, LogSource, OtherEntry};
use crate::error::{CollectorError, Result};

/// `log show` 的时间戳格式，例如 `2024-05-01 12:00:00.123456-0700`
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%z";
/// `--start` 带上时区偏移，夏令时回拨的那一小时也不会有歧义
const START_FORMAT: &str = "%Y-%m-%d %H:%M:%S%z";

/// One NDJSON line as printed by `log show --style ndjson`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLogLine {
    event_type: Option<String>,
    timestamp: Option<String>,
    event_message: Option<String>,
    process_image_path: Option<String>,
    #[serde(rename = "processID")]
    process_id: Option<u32>,
    subsystem: Option<String>,
    category: Option<String>,
}

/// Log source over the system-wide unified log store.
pub struct UnifiedLogSource {
    log_bin: PathBuf,
    scope: LogScope,
}

impl UnifiedLogSource {
    /// Locate the `log` tool and bind the source to `scope`.
    pub fn open(scope: LogScope) -> Result<Self> {
        let log_bin = which::which("log").map_err(|e| {
            CollectorError::SourceUnavailable(format!("`log` tool not found on PATH: {}", e))
        })?;
        Self::open_with(log_bin, scope)
    }

    /// Bind to an explicit `log` binary.
    ///
    /// System scope is checked up front with a one-second read, so a missing
    /// privilege fails here instead of on every poll.
    pub fn open_with(log_bin: impl Into<PathBuf>, scope: LogScope) -> Result<Self> {
        let source = Self {
            log_bin: log_bin.into(),
            scope,
        };
        if scope == LogScope::System {
            source.verify_system_access()?;
        }
        debug!(path = %source.log_bin.display(), ?scope, "Opened unified log store");
        Ok(source)
    }

    fn verify_system_access(&self) -> Result<()> {
        let output = Command::new(&self.log_bin)
            .args(["show", "--style", "ndjson", "--last", "1"])
            .output()
            .map_err(|e| {
                CollectorError::SourceUnavailable(format!("failed to run log show: {}", e))
            })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match classify_failure(&stderr, output.status.code()) {
            CollectorError::QueryFailed(detail) => Err(CollectorError::SourceUnavailable(detail)),
            e => Err(e),
        }
    }

    /// Combine the caller's predicate with the scope restriction.
    fn effective_predicate(&self, predicate: Option<&LogPredicate>) -> Option<String> {
        let scoped = match self.scope {
            LogScope::System => None,
            LogScope::CurrentProcess => {
                Some(LogPredicate::ProcessId(std::process::id()).render())
            }
        };
        match (predicate.map(LogPredicate::render), scoped) {
            (Some(p), Some(s)) => Some(format!("({}) AND ({})", p, s)),
            (Some(p), None) => Some(p),
            (None, s) => s,
        }
    }
}

impl LogSource for UnifiedLogSource {
    fn name(&self) -> &str {
        "unified_log"
    }

    fn query(
        &mut self,
        start: DateTime<Utc>,
        predicate: Option<&LogPredicate>,
    ) -> Result<Vec<LogEntry>> {
        let start_arg = format_start(start, &Local);

        let mut cmd = Command::new(&self.log_bin);
        cmd.args(["show", "--style", "ndjson", "--info", "--start", &start_arg]);
        if let Some(predicate) = self.effective_predicate(predicate) {
            cmd.args(["--predicate", &predicate]);
        }

        debug!(start = %start_arg, "Running log show");
        let output = cmd
            .output()
            .map_err(|e| CollectorError::QueryFailed(format!("failed to run log show: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_failure(&stderr, output.status.code()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut entries = parse_ndjson(&stdout)?;
        // --start is truncated to whole seconds
        entries.retain(|e| e.timestamp() >= start);
        Ok(entries)
    }
}

fn format_start<Tz: TimeZone>(start: DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: Display,
{
    start.with_timezone(tz).format(START_FORMAT).to_string()
}

fn classify_failure(stderr: &str, code: Option<i32>) -> CollectorError {
    let lower = stderr.to_lowercase();
    let detail = format!("log show exited with {:?}: {}", code, stderr);
    let denied = ["permission", "not permitted", "privilege"];
    if denied.iter().any(|needle| lower.contains(needle)) {
        CollectorError::SourceUnavailable(detail)
    } else {
        CollectorError::QueryFailed(detail)
    }
}

/// Parse `log show --style ndjson` output into entries sorted by timestamp.
///
/// Blank lines and the trailing `{"count":..,"finished":1}` summary are
/// skipped. Any other line that does not parse fails the whole query.
pub fn parse_ndjson(output: &str) -> Result<Vec<LogEntry>> {
    let mut entries = Vec::new();

    for (idx, line) in output.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let raw: RawLogLine = serde_json::from_str(line).map_err(|e| {
            CollectorError::QueryFailed(format!("malformed log line {}: {}", idx + 1, e))
        })?;

        let (Some(event_type), Some(timestamp)) =
            (raw.event_type.as_deref(), raw.timestamp.as_deref())
        else {
            // summary object
            continue;
        };

        let timestamp = DateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
            .map_err(|e| {
                CollectorError::QueryFailed(format!(
                    "bad timestamp '{}' on line {}: {}",
                    timestamp,
                    idx + 1,
                    e
                ))
            })?
            .with_timezone(&Utc);

        let entry = if event_type == "logEvent" {
            LogEntry::Log(LogRecord {
                timestamp,
                process: process_name(raw.process_image_path.as_deref().unwrap_or_default()),
                process_id: raw.process_id.unwrap_or_default(),
                subsystem: raw.subsystem.unwrap_or_default(),
                category: raw.category.unwrap_or_default(),
                message: raw.event_message.unwrap_or_default(),
            })
        } else {
            LogEntry::Other(OtherEntry {
                timestamp,
                kind: event_type.to_string(),
                description: raw.event_message.unwrap_or_default(),
            })
        };
        entries.push(entry);
    }

    entries.sort_by_key(|e| e.timestamp());
    Ok(entries)
}

fn process_name(image_path: &str) -> String {
    image_path
        .rsplit('/')
        .next()
        .unwrap_or(image_path)
        .to_string()
}
