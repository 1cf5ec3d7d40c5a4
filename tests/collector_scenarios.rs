//! End-to-end poll cycle scenarios against an in-memory log store

use std::fs;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;
use xprotect_collector::{
    read_batches, Clock, Collector, CollectorConfig, CollectorError, LogEntry, LogRecord,
    ManualClock, MemoryLogSource, OtherEntry,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn xprotect_entry(ts: DateTime<Utc>, message: &str) -> LogEntry {
    LogEntry::Log(LogRecord {
        timestamp: ts,
        process: "XProtect".to_string(),
        process_id: 412,
        subsystem: "com.apple.xprotect".to_string(),
        category: "xprotect".to_string(),
        message: message.to_string(),
    })
}

struct Harness {
    _dir: TempDir,
    output: std::path::PathBuf,
    source: MemoryLogSource,
    clock: Arc<ManualClock>,
    collector: Collector<MemoryLogSource>,
}

/// scope=system, predicate=subsystem contains "xprotect", look-back=1h
fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("xprotect_risk_events.json");
    let config = CollectorConfig {
        output_path: output.clone(),
        mirror_stdout: false,
        ..Default::default()
    };
    let clock = Arc::new(ManualClock::new(now()));
    let source = MemoryLogSource::new().with_clock(clock.clone());
    let collector = Collector::from_config(&config, source.clone(), clock.clone()).unwrap();
    Harness {
        _dir: dir,
        output,
        source,
        clock,
        collector,
    }
}

#[test]
fn test_scenario_a_benign_entry_writes_nothing() {
    // Given: one benign XProtect entry 30 minutes ago
    let mut h = harness();
    h.source.push(xprotect_entry(
        now() - Duration::minutes(30),
        "Already up to date",
    ));

    // When: one cycle runs
    let outcome = h.collector.poll_once().unwrap();

    // Then: nothing is written, but the cursor still advances
    assert_eq!(outcome.fetched, 1);
    assert_eq!(outcome.emitted, 0);
    assert!(!h.output.exists());
    assert_eq!(h.collector.cursor().position(), now());
}

#[test]
fn test_scenario_b_risk_entry_appends_one_batch() {
    // Given: one risk entry 10 minutes ago
    let mut h = harness();
    h.source.push(xprotect_entry(
        now() - Duration::minutes(10),
        "Quarantine detected suspicious file X",
    ));

    // When
    h.collector.poll_once().unwrap();

    // Then: exactly one batch with one event carrying the message verbatim
    let batches = read_batches(&h.output).unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    assert_eq!(batches[0][0].message, "Quarantine detected suspicious file X");
    assert!(fs::read_to_string(&h.output).unwrap().ends_with("]\n"));
}

#[test]
fn test_scenario_c_second_cycle_does_not_refetch() {
    // Given: an entry at T0 before the first cycle
    let mut h = harness();
    let t0 = now() - Duration::minutes(2);
    h.source.push(xprotect_entry(t0, "Remediator found Adload"));

    // When: two cycles a minute apart
    let first_began = h.clock.now();
    let first = h.collector.poll_once().unwrap();
    h.clock.advance(Duration::seconds(60));
    let second = h.collector.poll_once().unwrap();

    // Then: the second window starts where the first cycle began
    assert_eq!(first.emitted, 1);
    assert!(second.window_start >= first_began);
    assert_eq!(second.fetched, 0);
    assert_eq!(read_batches(&h.output).unwrap().len(), 1);
}

#[test]
fn test_cursor_ignores_entry_timestamps() {
    // Given: the newest entry is far older than the cycle start
    let mut h = harness();
    h.source.push(xprotect_entry(
        now() - Duration::minutes(50),
        "Remediator found Adload",
    ));

    h.collector.poll_once().unwrap();

    // Then: cursor is the cycle start, not the last entry's timestamp
    assert_eq!(h.collector.cursor().position(), now());
    h.clock.advance(Duration::seconds(60));
    h.collector.poll_once().unwrap();
    assert_eq!(h.source.queries()[1], now());
}

#[test]
fn test_retry_after_transient_failure_covers_same_window() {
    // Given: a static store and a query that fails once
    let mut h = harness();
    h.source.push(xprotect_entry(
        now() - Duration::minutes(20),
        "Quarantine detected suspicious file X",
    ));
    h.source.push(xprotect_entry(
        now() - Duration::minutes(15),
        "Remediator found Adload",
    ));
    h.source
        .fail_next(CollectorError::QueryFailed("store read error".to_string()));

    // When: first cycle fails, the immediate retry succeeds
    assert!(h.collector.poll_once().is_err());
    h.clock.advance(Duration::seconds(60));
    let retry = h.collector.poll_once().unwrap();

    // Then: same window start, nothing skipped
    let queries = h.source.queries();
    assert_eq!(queries[0], queries[1]);
    assert_eq!(retry.emitted, 2);
}

#[test]
fn test_non_log_entries_are_discarded() {
    let mut h = harness();
    h.source.push(LogEntry::Other(OtherEntry {
        timestamp: now() - Duration::minutes(5),
        kind: "signpostEvent".to_string(),
        description: "scan interval".to_string(),
    }));

    let outcome = h.collector.poll_once().unwrap();
    assert_eq!(outcome.emitted, 0);
    assert!(!h.output.exists());
}

#[test]
fn test_other_subsystems_are_not_queried_in() {
    let mut h = harness();
    h.source.push(LogEntry::Log(LogRecord {
        timestamp: now() - Duration::minutes(5),
        process: "launchd".to_string(),
        process_id: 1,
        subsystem: "com.apple.launchd".to_string(),
        category: "default".to_string(),
        message: "Quarantine detected suspicious file X".to_string(),
    }));

    assert_eq!(h.collector.poll_once().unwrap().fetched, 0);
}

#[test]
fn test_events_round_trip_with_exact_keys() {
    let mut h = harness();
    let ts = Utc.with_ymd_and_hms(2024, 5, 1, 11, 45, 30).unwrap();
    h.source.push(xprotect_entry(ts, "Quarantine detected suspicious file X"));

    h.collector.poll_once().unwrap();

    let content = fs::read_to_string(&h.output).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(content.trim_end()).unwrap();
    let object = parsed[0].as_object().unwrap();
    let mut keys: Vec<_> = object.keys().map(String::as_str).collect();
    keys.sort();
    assert_eq!(keys, ["category", "date", "message", "process", "subsystem"]);
    assert_eq!(object["date"], "2024-05-01T11:45:30Z");
    assert_eq!(object["process"], "XProtect");
    assert_eq!(object["subsystem"], "com.apple.xprotect");
    assert_eq!(object["category"], "xprotect");
    assert_eq!(object["message"], "Quarantine detected suspicious file X");
}
