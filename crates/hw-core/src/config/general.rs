//! Process-wide settings

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Directories and external tools shared by every instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Run records, one JSON file per instance
    pub state_dir: PathBuf,

    /// Per-instance JSONL activity logs and daemon log files
    pub log_dir: PathBuf,

    /// Local copies of device screenshots
    pub capture_dir: PathBuf,

    /// External programs the worker shells out to
    pub tools: ToolPaths,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        let data_dir = super::default_data_dir();

        Self {
            state_dir: data_dir.join("state"),
            log_dir: data_dir.join("logs"),
            capture_dir: data_dir.join("captures"),
            tools: ToolPaths::default(),
        }
    }
}

/// Program names or absolute paths of the external tools
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub ssh: String,
    pub sshpass: String,
    pub adb: String,
    pub pkill: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ssh: "ssh".to_string(),
            sshpass: "sshpass".to_string(),
            adb: "adb".to_string(),
            pkill: "pkill".to_string(),
        }
    }
}
