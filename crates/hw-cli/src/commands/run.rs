//! Foreground run and scheduler daemon

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use hw_core::RunStateStore;
use hw_scheduler::{LogRetention, ScheduleTicker, StartOutcome, Supervisor};

use super::{load_config_file, log_sink, require_instance, run_state_store};
use crate::output::{format_schedules, print_error, print_info, print_success, print_warning};

/// Run one instance in the foreground until it stops or `cancel` fires
pub async fn run_command(config_path: &Path, instance: &str, cancel: CancellationToken) -> Result<()> {
    let file = load_config_file(config_path)?;
    let key = require_instance(&file, instance)?;

    let store = Arc::new(run_state_store(&file));
    let (sink, _) = log_sink(&file);
    let supervisor = Supervisor::from_config(&file, store.clone(), sink);

    match supervisor.ensure_running(&key, None, None)? {
        StartOutcome::Started => print_info(&format!("Running {} (Ctrl+C to stop)", key)),
        StartOutcome::AlreadyRunning => {}
        StartOutcome::OwnedElsewhere { pid } => {
            print_error(&format!("{} is already running in process {}", key, pid));
            print_info(&format!("Stop it first: haulwatch stop {}", key));
            return Ok(());
        }
    }

    let finished = supervisor.wait(&key);
    tokio::pin!(finished);
    tokio::select! {
        _ = &mut finished => {}
        _ = cancel.cancelled() => {
            print_info("Stopping after the current cycle...");
            supervisor.cancel_all();
            finished.await;
        }
    }

    match store.record(&key)? {
        Some(record) if record.status.is_running() => {
            print_warning(&format!("{} ended with status {}", key, record.status))
        }
        _ => print_success(&format!("{} stopped", key)),
    }
    Ok(())
}

/// Run the schedule ticker and every instance it starts until `cancel` fires
pub async fn daemon_command(config_path: &Path, cancel: CancellationToken) -> Result<()> {
    let file = load_config_file(config_path)?;
    if file.schedules.is_empty() {
        print_warning("No schedules configured; the daemon will stay idle");
    }

    let store = Arc::new(run_state_store(&file));
    let (sink, jsonl) = log_sink(&file);
    let supervisor = Arc::new(Supervisor::from_config(&file, store, sink));

    let mut ticker = ScheduleTicker::new(file.schedules.clone(), supervisor.clone(), file.scheduler.tick)
        .with_log_retention(LogRetention {
            sink: jsonl,
            instances: file.instances.iter().map(|i| i.key.clone()).collect(),
            keep_days: file.scheduler.log_retention_days,
        });

    tracing::info!(
        "haulwatch daemon started with {} instances and {} schedules",
        file.instances.len(),
        file.schedules.len()
    );
    ticker.run(cancel).await;
    supervisor.shutdown().await;

    Ok(())
}

/// List the configured schedules
pub fn schedules_command(config_path: &Path) -> Result<()> {
    let file = load_config_file(config_path)?;
    println!("{}", format_schedules(&file.schedules));
    Ok(())
}
