//! 采集器配置 - `~/.config/xprotect-collector/config.json`

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CollectorError, Result};
use crate::filter::{BenignPhraseFilter, DEFAULT_BENIGN_PHRASES};
use crate::sink::OutputStyle;
use crate::source::{LogPredicate, LogScope};

pub const DEFAULT_OUTPUT_PATH: &str = "/var/log/xprotect_risk_events.json";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_LOOK_BACK_SECS: u64 = 3600;
pub const DEFAULT_SUBSYSTEM_FILTER: &str = "xprotect";
/// Upper bound for the look-back window (30 days)
const MAX_LOOK_BACK_SECS: u64 = 30 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Append-only risk event file
    pub output_path: PathBuf,
    pub poll_interval_secs: u64,
    /// Initial cursor is `now - look_back_secs`
    pub look_back_secs: u64,
    pub benign_phrases: Vec<String>,
    /// Case-insensitive subsystem substring; empty disables the predicate
    pub subsystem_filter: String,
    pub scope: LogScope,
    pub output_style: OutputStyle,
    /// Mirror every batch to stdout
    pub mirror_stdout: bool,
    /// Best-effort cursor checkpoint; disabled when unset
    pub checkpoint_path: Option<PathBuf>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            look_back_secs: DEFAULT_LOOK_BACK_SECS,
            benign_phrases: DEFAULT_BENIGN_PHRASES.iter().map(|s| s.to_string()).collect(),
            subsystem_filter: DEFAULT_SUBSYSTEM_FILTER.to_string(),
            scope: LogScope::System,
            output_style: OutputStyle::Pretty,
            mirror_stdout: true,
            checkpoint_path: None,
        }
    }
}

impl CollectorConfig {
    /// `~/.config/xprotect-collector/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| {
            home.join(".config")
                .join("xprotect-collector")
                .join("config.json")
        })
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| CollectorError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| {
            CollectorError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Load the explicit path if given (it must exist), else the default path
    /// if present, else built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "Loading collector config");
                Self::load_from(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.output_path.as_os_str().is_empty() {
            return Err(CollectorError::Config("output_path is empty".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(CollectorError::Config(
                "poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.look_back_secs > MAX_LOOK_BACK_SECS {
            return Err(CollectorError::Config(format!(
                "look_back_secs must be at most {}",
                MAX_LOOK_BACK_SECS
            )));
        }
        if self.benign_phrases.iter().any(|p| p.is_empty()) {
            // 空短语会匹配所有消息
            return Err(CollectorError::Config(
                "benign_phrases must not contain empty strings".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn look_back(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.look_back_secs.min(MAX_LOOK_BACK_SECS) as i64)
    }

    pub fn predicate(&self) -> Option<LogPredicate> {
        if self.subsystem_filter.is_empty() {
            None
        } else {
            Some(LogPredicate::SubsystemContains(self.subsystem_filter.clone()))
        }
    }

    pub fn filter(&self) -> BenignPhraseFilter {
        BenignPhraseFilter::new(self.benign_phrases.iter().cloned())
    }
}
