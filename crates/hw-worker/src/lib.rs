//! hw-worker: One running haulwatch instance
//!
//! A worker opens an SSH forward to the device's debug bridge, connects to it
//! with adb, and loops: capture the screen, find a truck, read its details and
//! share it when the acceptance rule allows. External programs are reached
//! through [`CommandRunner`] so the whole loop can run against fakes.

pub mod device;
pub mod log;
pub mod process;
pub mod rules;
pub mod tunnel;
pub mod worker;

#[cfg(test)]
mod testing;

pub use device::{AdbDeviceLink, DeviceControl};
pub use log::BotLogger;
pub use process::{CommandRunner, SystemCommandRunner};
pub use rules::{accepts, evaluate, Verdict};
pub use tunnel::TunnelManager;
pub use worker::{CycleOutcome, RunPhase, RunStats, Worker, WorkerParts};
