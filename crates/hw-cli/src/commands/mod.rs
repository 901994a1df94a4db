//! CLI command implementations

mod config;
mod inspect;
mod logs;
mod run;
mod status;
mod stop;

pub use config::{config_check, config_init, config_path, config_show};
pub use inspect::inspect_command;
pub use logs::logs_command;
pub use run::{daemon_command, run_command, schedules_command};
pub use status::status_command;
pub use stop::stop_command;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use hw_core::config as core_config;
use hw_core::log_sink::{FanoutLogSink, JsonlLogSink, TracingLogSink};
use hw_core::run_state::FileRunStateStore;
use hw_core::{InstanceKey, LogSink};
use hw_scheduler::ConfigFile;

/// `--config` or the platform default
pub fn resolve_config_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(core_config::default_config_path)
}

/// Load and validate the configuration file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    ConfigFile::load(path).with_context(|| format!("Failed to load config from {:?}", path))
}

fn run_state_store(file: &ConfigFile) -> FileRunStateStore {
    FileRunStateStore::new(file.general.state_dir.clone())
}

/// Activity goes to `tracing` and to the per-instance JSONL files
fn log_sink(file: &ConfigFile) -> (Arc<dyn LogSink>, Arc<JsonlLogSink>) {
    let jsonl = Arc::new(JsonlLogSink::new(file.general.log_dir.clone()));
    let sink = FanoutLogSink::new()
        .with(Arc::new(TracingLogSink))
        .with(jsonl.clone());
    (Arc::new(sink), jsonl)
}

fn require_instance(file: &ConfigFile, key: &str) -> Result<InstanceKey> {
    let key = InstanceKey::new(key);
    if file.instance(&key).is_none() {
        let known: Vec<String> = file.instances.iter().map(|i| i.key.to_string()).collect();
        anyhow::bail!(
            "Unknown instance '{}' (configured: {})",
            key,
            if known.is_empty() {
                "none".to_string()
            } else {
                known.join(", ")
            }
        );
    }
    Ok(key)
}
