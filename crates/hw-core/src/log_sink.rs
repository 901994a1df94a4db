//! User-facing activity log
//!
//! Entries written here are what an operator reads to see what a worker did
//! ("shared truck 25M from #49"). Diagnostic detail goes to `tracing` only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::types::{InstanceKey, LogLevel};

/// One activity line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub instance: InstanceKey,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    /// Entry stamped with the current time
    pub fn now(instance: InstanceKey, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            instance,
            level,
            message: message.into(),
        }
    }
}

/// Destination for activity entries.
///
/// Writing must not fail the caller; sinks report their own problems through
/// `tracing`.
pub trait LogSink: Send + Sync {
    fn log(&self, entry: &LogEntry);
}

/// Forwards entries to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, entry: &LogEntry) {
        let instance = entry.instance.as_str();
        match entry.level {
            LogLevel::Info => tracing::info!(instance, "{}", entry.message),
            LogLevel::Success => tracing::info!(instance, outcome = "success", "{}", entry.message),
            LogLevel::Warning => tracing::warn!(instance, "{}", entry.message),
            LogLevel::Error => tracing::error!(instance, "{}", entry.message),
        }
    }
}

/// Appends entries as JSON lines, one file per instance
#[derive(Debug)]
pub struct JsonlLogSink {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlLogSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// File holding the entries of `instance`
    pub fn path_for(&self, instance: &InstanceKey) -> PathBuf {
        self.dir.join(format!("{}.jsonl", instance.file_stem()))
    }

    fn append(&self, entry: &LogEntry) -> io::Result<()> {
        let line = serde_json::to_string(entry)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;

        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(&entry.instance))?;
        writeln!(file, "{}", line)
    }

    /// Last `limit` entries of `instance`, oldest first.
    ///
    /// Lines that do not parse are skipped.
    pub fn recent(&self, instance: &InstanceKey, limit: usize) -> io::Result<Vec<LogEntry>> {
        let entries = read_entries(&self.path_for(instance))?;
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.into_iter().skip(skip).collect())
    }

    /// Drop entries older than `cutoff`; returns how many were removed
    pub fn prune_before(&self, instance: &InstanceKey, cutoff: DateTime<Utc>) -> io::Result<usize> {
        let path = self.path_for(instance);
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;

        let entries = read_entries(&path)?;
        let before = entries.len();
        let kept: Vec<_> = entries
            .into_iter()
            .filter(|e| e.timestamp >= cutoff)
            .collect();
        let removed = before - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        let mut content = String::new();
        for entry in &kept {
            content.push_str(&serde_json::to_string(entry)?);
            content.push('\n');
        }
        let tmp = path.with_extension("jsonl.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;
        Ok(removed)
    }
}

fn read_entries(path: &Path) -> io::Result<Vec<LogEntry>> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::debug!("Skipping malformed log line in {:?}: {}", path, e),
        }
    }
    Ok(entries)
}

impl LogSink for JsonlLogSink {
    fn log(&self, entry: &LogEntry) {
        if let Err(e) = self.append(entry) {
            tracing::warn!(
                "Failed to append log entry to {:?}: {}",
                self.path_for(&entry.instance),
                e
            );
        }
    }
}

/// Writes every entry to several sinks
#[derive(Default, Clone)]
pub struct FanoutLogSink {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl FanoutLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl LogSink for FanoutLogSink {
    fn log(&self, entry: &LogEntry) {
        for sink in &self.sinks {
            sink.log(entry);
        }
    }
}

/// Keeps entries in memory
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything logged so far
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Messages logged at `level`
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.level == level)
            .map(|e| e.message)
            .collect()
    }
}

impl LogSink for MemoryLogSink {
    fn log(&self, entry: &LogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry.clone());
        }
    }
}
