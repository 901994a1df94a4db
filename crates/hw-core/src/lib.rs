//! hw-core: Core abstractions and configuration for haulwatch
//!
//! This crate provides the shared types, configuration structures, UI layout
//! table and the two external seams every worker talks to: the log sink and
//! the run-state store.

pub mod config;
pub mod error;
pub mod layout;
pub mod log_sink;
pub mod run_state;
pub mod types;

pub use error::BotError;
pub use layout::{ResolvedLayout, UiLayout};
pub use log_sink::{LogEntry, LogSink};
pub use run_state::{RunRecord, RunStateStore};
pub use types::{InstanceKey, LogLevel, RunStatus};
