//! Scheduler error types

use hw_core::error::{ConfigError, RunStateError};
use hw_core::InstanceKey;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    /// No `[[instances]]` entry with this key
    #[error("Unknown instance: {0}")]
    UnknownInstance(InstanceKey),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Run state error: {0}")]
    RunState(#[from] RunStateError),
}
