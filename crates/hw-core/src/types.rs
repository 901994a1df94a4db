//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of one worker instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceKey(pub String);

impl InstanceKey {
    /// Create a new instance key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the raw key string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key as a file name component.
    ///
    /// ASCII letters, digits and `-` are kept; every other byte, `_`
    /// included, becomes `_XX` in upper-case hex. Distinct keys therefore
    /// never share a capture, run-state or log file.
    pub fn file_stem(&self) -> String {
        let mut stem = String::with_capacity(self.0.len());
        for byte in self.0.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                stem.push(byte as char);
            } else {
                stem.push_str(&format!("_{:02X}", byte));
            }
        }
        stem
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for InstanceKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InstanceKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Durable run flag of one instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Worker should keep cycling
    Running,
    /// Someone asked the worker to stop; it exits at its next safe point
    StopRequested,
    /// Not running
    #[default]
    Stopped,
}

impl RunStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::StopRequested => write!(f, "stop requested"),
            RunStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Severity of a user-facing log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Success => write!(f, "success"),
            LogLevel::Warning => write!(f, "warning"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_key_file_stem() {
        let key = InstanceKey::new("player@example.com");
        assert_eq!(key.file_stem(), "player_40example_2Ecom");
        assert_eq!(InstanceKey::from("alpha-1").file_stem(), "alpha-1");
        assert_eq!(InstanceKey::from("ü").file_stem(), "_C3_BC");
    }

    #[test]
    fn test_file_stems_of_distinct_keys_differ() {
        let pairs = [
            ("alpha@x.com", "alpha_x_com"),
            ("a_40b", "a@b"),
            ("a b", "a_b"),
            ("a/b", "a_2Fb"),
        ];
        for (left, right) in pairs {
            assert_ne!(
                InstanceKey::new(left).file_stem(),
                InstanceKey::new(right).file_stem(),
                "{left} vs {right}"
            );
        }
    }

    #[test]
    fn test_run_status_serde() {
        let json = serde_json::to_string(&RunStatus::StopRequested).unwrap();
        assert_eq!(json, r#""stop_requested""#);
        let parsed: RunStatus = serde_json::from_str(r#""running""#).unwrap();
        assert!(parsed.is_running());
        assert_eq!(RunStatus::default(), RunStatus::Stopped);
    }

    #[test]
    fn test_log_level_display() {
        assert_eq!(format!("{}", LogLevel::Success), "success");
        assert_eq!(format!("{}", LogLevel::Warning), "warning");
    }
}
