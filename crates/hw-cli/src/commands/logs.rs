//! Logs command implementation

use std::path::Path;

use anyhow::{Context, Result};

use hw_core::log_sink::JsonlLogSink;

use super::{load_config_file, require_instance};
use crate::output::{print_info, print_log_entry};

/// Print the last `lines` activity entries of an instance
pub fn logs_command(config_path: &Path, instance: &str, lines: usize) -> Result<()> {
    let file = load_config_file(config_path)?;
    let key = require_instance(&file, instance)?;
    let sink = JsonlLogSink::new(file.general.log_dir.clone());

    let entries = sink
        .recent(&key, lines)
        .with_context(|| format!("Failed to read {:?}", sink.path_for(&key)))?;
    if entries.is_empty() {
        print_info(&format!("No activity recorded for {}", key));
        return Ok(());
    }

    for entry in &entries {
        print_log_entry(entry);
    }
    Ok(())
}
