//! Poll cursor - the boundary between processed and unprocessed log entries
//!
//! The cursor moves `Idle -> Polling` when a cycle starts and back to `Idle`
//! when it commits or aborts. Only a commit advances it, and never backward.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CollectorError, Result};

/// Source of "now" for the poll loop.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Idle,
    Polling,
}

/// Proof that a cycle holds the cursor. Consumed by `commit` or `abort`.
#[derive(Debug, PartialEq, Eq)]
pub struct PollTicket {
    /// Query start: the cursor value when the cycle began
    pub window_start: DateTime<Utc>,
    /// Instant the cycle began; becomes the cursor on commit
    pub started_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Cursor {
    position: DateTime<Utc>,
    state: CursorState,
}

impl Cursor {
    pub fn new(position: DateTime<Utc>) -> Self {
        Self {
            position,
            state: CursorState::Idle,
        }
    }

    /// Cursor for a fresh start: `now - look_back`.
    pub fn looking_back(now: DateTime<Utc>, look_back: Duration) -> Self {
        Self::new(now - look_back)
    }

    pub fn position(&self) -> DateTime<Utc> {
        self.position
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn begin(&mut self, now: DateTime<Utc>) -> Result<PollTicket> {
        if self.state == CursorState::Polling {
            return Err(CollectorError::CycleInProgress);
        }
        self.state = CursorState::Polling;
        Ok(PollTicket {
            window_start: self.position,
            started_at: now,
        })
    }

    /// Finish a successful cycle and return the new position.
    pub fn commit(&mut self, ticket: PollTicket) -> DateTime<Utc> {
        // A clock step backwards must not rewind the cursor
        if ticket.started_at > self.position {
            self.position = ticket.started_at;
        }
        self.state = CursorState::Idle;
        self.position
    }

    /// Finish a failed cycle; the same window is retried next time.
    pub fn abort(&mut self, _ticket: PollTicket) {
        self.state = CursorState::Idle;
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    cursor: DateTime<Utc>,
}

/// Best-effort on-disk copy of the cursor.
#[derive(Debug, Clone)]
pub struct CursorCheckpoint {
    path: PathBuf,
}

impl CursorCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved cursor. A missing file is `Ok(None)`.
    pub fn load(&self) -> Result<Option<DateTime<Utc>>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CollectorError::io(&self.path, e)),
        };
        let file: CheckpointFile = serde_json::from_str(&content)?;
        Ok(Some(file.cursor))
    }

    /// Write the cursor atomically (temp file + rename).
    pub fn save(&self, cursor: DateTime<Utc>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| CollectorError::io(parent, e))?;
            }
        }

        let temp_path = self.path.with_extension("tmp");
        let content = serde_json::to_string(&CheckpointFile { cursor })?;
        fs::write(&temp_path, content).map_err(|e| CollectorError::io(&temp_path, e))?;
        fs::rename(&temp_path, &self.path).map_err(|e| CollectorError::io(&self.path, e))?;
        Ok(())
    }

    /// Starting cursor: the checkpoint if usable, otherwise `now - look_back`.
    pub fn initial_cursor(&self, now: DateTime<Utc>, look_back: Duration) -> Cursor {
        match self.load() {
            Ok(Some(saved)) if saved <= now => Cursor::new(saved),
            Ok(Some(saved)) => {
                warn!(checkpoint = %saved, "Checkpoint is in the future, ignoring");
                Cursor::looking_back(now, look_back)
            }
            Ok(None) => Cursor::looking_back(now, look_back),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unreadable checkpoint, ignoring");
                Cursor::looking_back(now, look_back)
            }
        }
    }
}
