//! Stop command implementation

use std::path::Path;

use anyhow::Result;

use super::{load_config_file, require_instance, run_state_store};
use crate::output::{print_info, print_success};

/// Ask a running instance to stop after its current cycle
pub fn stop_command(config_path: &Path, instance: &str) -> Result<()> {
    let file = load_config_file(config_path)?;
    let key = require_instance(&file, instance)?;
    let store = run_state_store(&file);

    if hw_scheduler::request_stop(&store, &key)? {
        print_success(&format!("Stop requested for {}", key));
    } else {
        print_info(&format!("{} is not running", key));
    }
    Ok(())
}
