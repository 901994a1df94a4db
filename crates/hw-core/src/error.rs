//! Core error types for haulwatch

use hw_vision::{Point, VisionError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for a worker run
#[derive(Error, Debug)]
pub enum BotError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Tunnel error
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// Device link error
    #[error("Device link error: {0}")]
    DeviceLink(#[from] DeviceLinkError),

    /// Cycle error
    #[error("Cycle error: {0}")]
    Cycle(#[from] CycleError),

    /// Run-state store error
    #[error("Run state error: {0}")]
    RunState(#[from] RunStateError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Reference template unusable
    #[error("Template unusable: {0}")]
    Template(#[source] VisionError),
}

/// SSH forward setup errors
#[derive(Error, Debug)]
pub enum TunnelError {
    /// ssh (or sshpass) could not be started
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// ssh exited with a failure status
    #[error("ssh exited with code {code:?}: {stderr}")]
    Exited { code: Option<i32>, stderr: String },

    /// ssh did not finish setting up the forward in time
    #[error("ssh did not finish within {0:?}")]
    TimedOut(Duration),

    /// Inline key could not be materialized
    #[error("Credential error: {0}")]
    Credential(String),
}

/// Debug-bridge errors
#[derive(Error, Debug)]
pub enum DeviceLinkError {
    /// adb did not confirm the connection
    #[error("adb did not confirm connection to {serial}: {output}")]
    NotConfirmed { serial: String, output: String },

    /// adb command failed
    #[error("adb {command} failed: {message}")]
    Command { command: String, message: String },

    /// adb command timed out
    #[error("adb {command} timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

/// Errors inside one cycle; logged and contained by the loop
#[derive(Error, Debug)]
pub enum CycleError {
    /// Cycle attempted before a successful start
    #[error("Worker is not started")]
    NotStarted,

    /// Screenshot could not be taken or decoded
    #[error("Screen capture failed")]
    CaptureFailed,

    /// A tap was not delivered
    #[error("Tap on {target} at {point} failed")]
    TapFailed { target: String, point: Point },

    /// Matching or OCR failed
    #[error("Vision error: {0}")]
    Vision(#[from] VisionError),

    /// Blocking task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),
}

/// Errors while releasing resources; logged and swallowed by cleanup
#[derive(Error, Debug)]
pub enum CleanupError {
    /// Device disconnect failed
    #[error("Device disconnect failed: {0}")]
    Disconnect(String),

    /// Tunnel teardown failed
    #[error("Tunnel teardown failed: {0}")]
    Tunnel(String),

    /// Capture file could not be removed
    #[error("Failed to remove {path}: {source}")]
    RemoveCapture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Run-state store errors
#[derive(Error, Debug)]
pub enum RunStateError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record is not valid JSON
    #[error("Malformed run record {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Record could not be encoded
    #[error("Failed to encode run record: {0}")]
    Encode(#[from] serde_json::Error),
}
