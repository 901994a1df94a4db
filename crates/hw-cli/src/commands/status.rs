//! Status command implementation

use std::path::Path;

use anyhow::Result;
use chrono::Utc;

use hw_core::RunStateStore;

use super::{load_config_file, run_state_store};
use crate::output::{format_status, InstanceStatus};

/// Show the run state of every configured instance
pub fn status_command(config_path: &Path, instance: Option<&str>) -> Result<()> {
    let file = load_config_file(config_path)?;
    let store = run_state_store(&file);

    let mut rows = Vec::new();
    for config in &file.instances {
        if instance.is_some_and(|only| only != config.key.as_str()) {
            continue;
        }
        let record = store.record(&config.key)?;
        let status = record
            .as_ref()
            .map(|r| r.effective_status())
            .unwrap_or_default();
        rows.push(InstanceStatus {
            key: config.key.clone(),
            status,
            record,
            configured_rule: config.rule.clone(),
        });
    }

    println!("{}", format_status(&rows, Utc::now()));
    Ok(())
}
