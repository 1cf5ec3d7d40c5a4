//! XProtect Risk Collector - 轮询 macOS 统一日志并输出风险事件
//!
//! Each poll cycle queries the log store from the cursor, drops benign
//! XProtect chatter, appends the remaining messages as one JSON array to the
//! output file, and only then advances the cursor.

pub mod collector;
pub mod config;
pub mod cursor;
pub mod error;
pub mod event;
pub mod filter;
pub mod scheduler;
pub mod sink;
pub mod source;

pub use collector::{Collector, PollOutcome, PollStats};
pub use config::CollectorConfig;
pub use cursor::{
    Clock, Cursor, CursorCheckpoint, CursorState, ManualClock, PollTicket, SystemClock,
};
pub use error::{CollectorError, Result};
pub use event::{select_risk_events, RiskEvent};
pub use filter::{BenignPhraseFilter, DEFAULT_BENIGN_PHRASES};
pub use scheduler::{PollScheduler, SchedulerHandle};
pub use sink::{read_batches, JsonArraySink, OutputStyle};
pub use source::{
    LogEntry, LogPredicate, LogRecord, LogScope, LogSource, MemoryLogSource, OtherEntry,
    UnifiedLogSource,
};
