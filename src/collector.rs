//! Poll cycle - query, filter, transform, append, advance
//!
//! The cursor is committed only after the batch reached the output file, so
//! a failed query or a failed write leaves the window to be retried.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::CollectorConfig;
use crate::cursor::{Clock, Cursor, CursorCheckpoint, PollTicket};
use crate::error::Result;
use crate::event::select_risk_events;
use crate::filter::BenignPhraseFilter;
use crate::sink::JsonArraySink;
use crate::source::{LogPredicate, LogSource};

/// Warn again every this many consecutive failures
const FAILURE_WARN_EVERY: u32 = 10;

/// Result of one successful poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Entries returned by the source inside the window
    pub fetched: usize,
    /// Risk events appended to the output file
    pub emitted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollStats {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub consecutive_failures: u32,
    pub events_emitted: u64,
    pub last_success: Option<DateTime<Utc>>,
}

/// Owns every piece of one collector: source, filter, sink and cursor.
pub struct Collector<S: LogSource> {
    source: S,
    predicate: Option<LogPredicate>,
    filter: BenignPhraseFilter,
    sink: JsonArraySink,
    cursor: Cursor,
    clock: Arc<dyn Clock>,
    checkpoint: Option<CursorCheckpoint>,
    stats: PollStats,
}

impl<S: LogSource> Collector<S> {
    pub fn new(source: S, sink: JsonArraySink, cursor: Cursor, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            predicate: None,
            filter: BenignPhraseFilter::default(),
            sink,
            cursor,
            clock,
            checkpoint: None,
            stats: PollStats::default(),
        }
    }

    /// Build a collector from configuration. The initial cursor comes from the
    /// checkpoint when one is configured and readable.
    pub fn from_config(config: &CollectorConfig, source: S, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let now = clock.now();
        let checkpoint = config.checkpoint_path.as_ref().map(CursorCheckpoint::new);
        let cursor = match &checkpoint {
            Some(checkpoint) => checkpoint.initial_cursor(now, config.look_back()),
            None => Cursor::looking_back(now, config.look_back()),
        };

        let mut sink = JsonArraySink::new(&config.output_path, config.output_style);
        if config.mirror_stdout {
            sink = sink.with_stdout_mirror();
        }

        let mut collector = Self::new(source, sink, cursor, clock).with_filter(config.filter());
        collector.predicate = config.predicate();
        collector.checkpoint = checkpoint;
        Ok(collector)
    }

    pub fn with_predicate(mut self, predicate: LogPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn with_filter(mut self, filter: BenignPhraseFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: CursorCheckpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn stats(&self) -> &PollStats {
        &self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Run one poll cycle to completion.
    pub fn poll_once(&mut self) -> Result<PollOutcome> {
        let ticket = self.cursor.begin(self.clock.now())?;
        self.stats.cycles += 1;

        match self.run_cycle(&ticket) {
            Ok(outcome) => {
                let position = self.cursor.commit(ticket);
                self.save_checkpoint(position);
                self.stats.consecutive_failures = 0;
                self.stats.events_emitted += outcome.emitted as u64;
                self.stats.last_success = Some(outcome.window_end);

                if outcome.emitted > 0 {
                    info!(
                        fetched = outcome.fetched,
                        emitted = outcome.emitted,
                        "Risk events written"
                    );
                } else {
                    debug!(fetched = outcome.fetched, "No risk events this cycle");
                }
                Ok(outcome)
            }
            Err(e) => {
                self.cursor.abort(ticket);
                self.stats.failed_cycles += 1;
                self.stats.consecutive_failures += 1;
                if self.stats.consecutive_failures % FAILURE_WARN_EVERY == 0 {
                    warn!(
                        source = self.source.name(),
                        consecutive = self.stats.consecutive_failures,
                        cursor = %self.cursor.position(),
                        "Poll keeps failing, cursor held"
                    );
                }
                Err(e)
            }
        }
    }

    fn run_cycle(&mut self, ticket: &PollTicket) -> Result<PollOutcome> {
        let mut entries = self
            .source
            .query(ticket.window_start, self.predicate.as_ref())?;
        // Anything at or after the cycle start belongs to the next window
        entries.retain(|entry| entry.timestamp() < ticket.started_at);

        let events = select_risk_events(&entries, &self.filter);
        self.sink.append(&events)?;

        Ok(PollOutcome {
            window_start: ticket.window_start,
            window_end: ticket.started_at,
            fetched: entries.len(),
            emitted: events.len(),
        })
    }

    fn save_checkpoint(&self, position: DateTime<Utc>) {
        if let Some(checkpoint) = &self.checkpoint {
            if let Err(e) = checkpoint.save(position) {
                warn!(
                    path = %checkpoint.path().display(),
                    error = %e,
                    "Failed to save cursor checkpoint"
                );
            }
        }
    }
}
