//! 输出文件 - 以 JSON 数组批次追加风险事件
//!
//! Each non-empty batch is appended as one JSON array followed by a newline.
//! The file is never truncated; consumers read it as a stream of arrays.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CollectorError, Result};
use crate::event::RiskEvent;

/// How a batch is laid out in the output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStyle {
    /// Indented, multi-line arrays
    #[default]
    Pretty,
    /// One array per line (JSON Lines)
    Compact,
}

/// Append-only JSON batch writer.
pub struct JsonArraySink {
    path: PathBuf,
    style: OutputStyle,
    /// Operator-facing copy of every batch (stdout in production)
    mirror: Option<Box<dyn Write + Send>>,
}

impl JsonArraySink {
    pub fn new(path: impl Into<PathBuf>, style: OutputStyle) -> Self {
        Self {
            path: path.into(),
            style,
            mirror: None,
        }
    }

    pub fn with_mirror(mut self, mirror: Box<dyn Write + Send>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn with_stdout_mirror(self) -> Self {
        self.with_mirror(Box::new(std::io::stdout()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `events` as one batch. An empty batch touches nothing.
    pub fn append(&mut self, events: &[RiskEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let json = match self.style {
            OutputStyle::Pretty => serde_json::to_string_pretty(events)?,
            OutputStyle::Compact => serde_json::to_string(events)?,
        };

        self.write_batch(&json)?;
        debug!(path = %self.path.display(), count = events.len(), "Appended risk event batch");

        if let Some(mirror) = self.mirror.as_mut() {
            if let Err(e) = writeln!(mirror, "{}", json).and_then(|_| mirror.flush()) {
                warn!(error = %e, "Failed to mirror batch to diagnostic stream");
            }
        }

        Ok(())
    }

    fn write_batch(&self, json: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| CollectorError::io(parent, e))?;
            }
        }

        let io_err = |e| CollectorError::io(&self.path, e);

        // append 模式：不存在则创建，已存在则从末尾写入，绝不截断
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;

        file.lock_exclusive().map_err(io_err)?;
        let written = file
            .write_all(json.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.flush());
        let unlocked = file.unlock();

        written.map_err(io_err)?;
        unlocked.map_err(io_err)?;
        Ok(())
    }
}

/// Read every batch from an output file. A missing file has no batches.
pub fn read_batches(path: impl AsRef<Path>) -> Result<Vec<Vec<RiskEvent>>> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CollectorError::io(path, e)),
    };

    serde_json::Deserializer::from_reader(BufReader::new(file))
        .into_iter::<Vec<RiskEvent>>()
        .map(|batch| batch.map_err(CollectorError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn event(message: &str) -> RiskEvent {
        RiskEvent {
            date: "2024-05-01T12:00:00Z".to_string(),
            process: "XProtect".to_string(),
            subsystem: "com.apple.xprotect".to_string(),
            category: "xprotect".to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_empty_batch_does_not_create_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.json");
        let mirror = SharedBuf::default();
        let mut sink =
            JsonArraySink::new(&path, OutputStyle::Pretty).with_mirror(Box::new(mirror.clone()));

        sink.append(&[]).unwrap();

        assert!(!path.exists());
        assert!(mirror.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_batches_are_appended_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("events.json");
        let mut sink = JsonArraySink::new(&path, OutputStyle::Pretty);

        sink.append(&[event("first"), event("second")]).unwrap();
        sink.append(&[event("third")]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.ends_with("]\n"));

        let batches = read_batches(&path).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], vec![event("first"), event("second")]);
        assert_eq!(batches[1], vec![event("third")]);
    }

    #[test]
    fn test_existing_content_is_preserved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.json");
        fs::write(&path, "[]\n").unwrap();

        let mut sink = JsonArraySink::new(&path, OutputStyle::Compact);
        sink.append(&[event("new")]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("[]\n"));
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_compact_style_is_one_line_per_batch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut sink = JsonArraySink::new(&path, OutputStyle::Compact);

        sink.append(&[event("a"), event("b")]).unwrap();
        sink.append(&[event("c")]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: Vec<RiskEvent> = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed, vec![event("c")]);
    }

    #[test]
    fn test_mirror_receives_same_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.json");
        let mirror = SharedBuf::default();
        let mut sink =
            JsonArraySink::new(&path, OutputStyle::Pretty).with_mirror(Box::new(mirror.clone()));

        sink.append(&[event("mirrored")]).unwrap();

        let mirrored = String::from_utf8(mirror.0.lock().unwrap().clone()).unwrap();
        assert_eq!(mirrored, fs::read_to_string(&path).unwrap());
    }

    #[test]
    fn test_mirror_failure_does_not_fail_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.json");
        let mut sink =
            JsonArraySink::new(&path, OutputStyle::Pretty).with_mirror(Box::new(BrokenPipe));

        sink.append(&[event("kept")]).unwrap();
        assert_eq!(read_batches(&path).unwrap(), vec![vec![event("kept")]]);
    }

    #[test]
    fn test_unwritable_path_is_io_error() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be
        let path = dir.path().join("events.json");
        fs::create_dir(&path).unwrap();

        let mut sink = JsonArraySink::new(&path, OutputStyle::Pretty);
        let err = sink.append(&[event("lost")]).unwrap_err();
        assert!(matches!(err, CollectorError::Io { .. }));
    }

    #[test]
    fn test_read_batches_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(read_batches(dir.path().join("absent.json")).unwrap().is_empty());
    }
}
