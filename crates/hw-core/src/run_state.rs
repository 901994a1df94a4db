//! Durable "should this instance keep running" flag
//!
//! The supervisor and the CLI write records; workers only read them, once
//! before every cycle. A record owned by a process that no longer exists is
//! reported as stopped so a crashed daemon cannot pin an instance to
//! `Running`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::AcceptanceRule;
use crate::error::RunStateError;
use crate::types::{InstanceKey, RunStatus};

/// Stored state of one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub status: RunStatus,

    /// Process that owns the worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    pub updated_at: DateTime<Utc>,

    /// Rule the worker was started with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<AcceptanceRule>,

    /// Schedule that started the run, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

impl RunRecord {
    /// Running, owned by `pid`, with the rule that was applied
    pub fn running(pid: u32, rule: AcceptanceRule) -> Self {
        Self {
            status: RunStatus::Running,
            pid: Some(pid),
            updated_at: Utc::now(),
            rule: Some(rule),
            schedule: None,
        }
    }

    pub fn stopped() -> Self {
        Self {
            status: RunStatus::Stopped,
            pid: None,
            updated_at: Utc::now(),
            rule: None,
            schedule: None,
        }
    }

    pub fn with_schedule(mut self, name: impl Into<String>) -> Self {
        self.schedule = Some(name.into());
        self
    }

    /// Same run, now asked to stop
    pub fn stop_requested(&self) -> Self {
        Self {
            status: RunStatus::StopRequested,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Status after accounting for a dead owner
    pub fn effective_status(&self) -> RunStatus {
        match (self.status, self.pid) {
            (RunStatus::Stopped, _) => RunStatus::Stopped,
            (_, Some(pid)) if !is_process_alive(pid) => RunStatus::Stopped,
            (status, _) => status,
        }
    }
}

/// Storage of run records
pub trait RunStateStore: Send + Sync {
    /// Raw record, `None` if the instance was never started
    fn record(&self, key: &InstanceKey) -> Result<Option<RunRecord>, RunStateError>;

    /// Replace the record of `key`
    fn write(&self, key: &InstanceKey, record: &RunRecord) -> Result<(), RunStateError>;

    /// Every stored record
    fn list(&self) -> Result<Vec<(InstanceKey, RunRecord)>, RunStateError>;

    /// Effective status; a missing record is `Stopped`
    fn status(&self, key: &InstanceKey) -> Result<RunStatus, RunStateError> {
        Ok(self
            .record(key)?
            .map(|r| r.effective_status())
            .unwrap_or(RunStatus::Stopped))
    }

    fn is_running(&self, key: &InstanceKey) -> Result<bool, RunStateError> {
        Ok(self.status(key)?.is_running())
    }
}

/// On-disk form; keeps the unsanitized key next to the record
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    instance: InstanceKey,
    #[serde(flatten)]
    record: RunRecord,
}

/// One JSON file per instance in a directory
#[derive(Debug, Clone)]
pub struct FileRunStateStore {
    dir: PathBuf,
}

impl FileRunStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &InstanceKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.file_stem()))
    }

    fn read_file(path: &Path) -> Result<Option<StoredRecord>, RunStateError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored = serde_json::from_str(&content).map_err(|source| RunStateError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(stored))
    }
}

impl RunStateStore for FileRunStateStore {
    fn record(&self, key: &InstanceKey) -> Result<Option<RunRecord>, RunStateError> {
        Ok(Self::read_file(&self.path_for(key))?.map(|stored| stored.record))
    }

    fn write(&self, key: &InstanceKey, record: &RunRecord) -> Result<(), RunStateError> {
        fs::create_dir_all(&self.dir)?;

        let stored = StoredRecord {
            instance: key.clone(),
            record: record.clone(),
        };
        let content = serde_json::to_string_pretty(&stored)?;

        // Readers never see a half-written record
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;

        tracing::debug!("Run record {} -> {}", key, record.status);
        Ok(())
    }

    fn list(&self) -> Result<Vec<(InstanceKey, RunRecord)>, RunStateError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_file(&path) {
                Ok(Some(stored)) => records.push((stored.instance, stored.record)),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping run record: {}", e),
            }
        }
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }
}

/// Records held in memory, for a single process
#[derive(Debug, Default)]
pub struct MemoryRunStateStore {
    records: DashMap<InstanceKey, RunRecord>,
}

impl MemoryRunStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStateStore for MemoryRunStateStore {
    fn record(&self, key: &InstanceKey) -> Result<Option<RunRecord>, RunStateError> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    fn write(&self, key: &InstanceKey, record: &RunRecord) -> Result<(), RunStateError> {
        self.records.insert(key.clone(), record.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<(InstanceKey, RunRecord)>, RunStateError> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }
}

/// Check if a process with the given PID is still alive
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    // kill(pid, 0) probes without signalling; EPERM still means the process exists
    unsafe {
        let result = libc::kill(pid as libc::pid_t, 0);
        if result == 0 {
            return true;
        }
        let err = std::io::Error::last_os_error();
        err.raw_os_error() == Some(libc::EPERM)
    }
}

#[cfg(windows)]
pub fn is_process_alive(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle == 0 {
            return false;
        }
        CloseHandle(handle);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key() -> InstanceKey {
        InstanceKey::new("alpha")
    }

    #[test]
    fn test_missing_record_is_stopped() {
        let dir = TempDir::new().unwrap();
        let store = FileRunStateStore::new(dir.path());
        assert!(store.record(&key()).unwrap().is_none());
        assert_eq!(store.status(&key()).unwrap(), RunStatus::Stopped);
        assert!(!store.is_running(&key()).unwrap());
    }

    #[test]
    fn test_write_and_read() {
        let dir = TempDir::new().unwrap();
        let store = FileRunStateStore::new(dir.path().join("state"));

        let record = RunRecord::running(std::process::id(), AcceptanceRule::default())
            .with_schedule("evening");
        store.write(&key(), &record).unwrap();

        assert_eq!(store.record(&key()).unwrap(), Some(record.clone()));
        assert!(store.is_running(&key()).unwrap());

        store.write(&key(), &record.stop_requested()).unwrap();
        assert_eq!(store.status(&key()).unwrap(), RunStatus::StopRequested);
    }

    #[test]
    fn test_stale_owner_reports_stopped() {
        let dir = TempDir::new().unwrap();
        let store = FileRunStateStore::new(dir.path());

        let record = RunRecord::running(999_999_999, AcceptanceRule::default());
        store.write(&key(), &record).unwrap();

        assert_eq!(
            store.record(&key()).unwrap().map(|r| r.status),
            Some(RunStatus::Running)
        );
        assert_eq!(store.status(&key()).unwrap(), RunStatus::Stopped);
    }

    #[test]
    fn test_malformed_record_is_error() {
        let dir = TempDir::new().unwrap();
        let store = FileRunStateStore::new(dir.path());
        fs::write(dir.path().join("alpha.json"), "{").unwrap();
        assert!(matches!(
            store.status(&key()),
            Err(RunStateError::Malformed { .. })
        ));
    }

    #[test]
    fn test_list_keeps_original_keys() {
        let dir = TempDir::new().unwrap();
        let store = FileRunStateStore::new(dir.path());
        store
            .write(&InstanceKey::new("b@example.com"), &RunRecord::stopped())
            .unwrap();
        store
            .write(&InstanceKey::new("a@example.com"), &RunRecord::stopped())
            .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let keys: Vec<_> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|(k, _)| k.0)
            .collect();
        assert_eq!(keys, vec!["a@example.com", "b@example.com"]);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryRunStateStore::new();
        assert_eq!(store.status(&key()).unwrap(), RunStatus::Stopped);

        let mut record = RunRecord::running(std::process::id(), AcceptanceRule::default());
        record.pid = None;
        store.write(&key(), &record).unwrap();
        assert!(store.is_running(&key()).unwrap());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_invalid_pid_not_alive() {
        assert!(!is_process_alive(999_999_999));
    }
}
