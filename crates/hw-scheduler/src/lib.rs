//! hw-scheduler: Supervision and scheduling of haulwatch instances
//!
//! The [`Supervisor`] owns one task per running instance and the run records
//! of those instances. The [`ScheduleTicker`] checks the configured time
//! windows once a minute and asks the supervisor to start or stop instances.

pub mod backoff;
pub mod config;
pub mod error;
pub mod schedule;
pub mod supervisor;
pub mod ticker;

pub use backoff::ExponentialBackoff;
pub use config::{BackoffConfig, ConfigFile, SchedulerConfig};
pub use error::SchedulerError;
pub use schedule::{due_actions, Schedule, ScheduleAction};
pub use supervisor::{request_stop, InstanceRunner, StartOutcome, Supervisor, WorkerRunner};
pub use ticker::{LogRetention, ScheduleTicker};
