//! haulwatch: Command-line interface
//!
//! Provides the `haulwatch` binary that runs instances in the foreground,
//! drives the schedule daemon and inspects run state and activity logs.

pub mod commands;
pub mod output;
