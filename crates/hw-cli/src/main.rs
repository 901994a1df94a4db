//! haulwatch CLI
//!
//! Single binary for all haulwatch operations:
//! - Foreground runs of one instance
//! - The schedule daemon that starts and stops instances
//! - Status, logs and offline screenshot inspection

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use haulwatch::commands;
use hw_core::config::GeneralConfig;
use hw_scheduler::ConfigFile;

#[derive(Parser)]
#[command(name = "haulwatch")]
#[command(author, version, about = "Scheduled convoy truck sharing on remote emulators")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one instance in the foreground until stopped
    Run {
        /// Instance key from the configuration
        instance: String,
    },

    /// Ask a running instance to stop after its current cycle
    Stop {
        /// Instance key from the configuration
        instance: String,
    },

    /// Show the run state of configured instances
    Status {
        /// Only show this instance
        instance: Option<String>,
    },

    /// Show recent activity of an instance
    Logs {
        /// Instance key from the configuration
        instance: String,
        /// Number of entries to show
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },

    /// Start and stop instances according to the schedules
    Daemon,

    /// List configured schedules
    Schedules,

    /// Analyze a saved screenshot with the matcher and OCR
    Inspect {
        /// Screenshot to analyze
        image: PathBuf,
        /// Use tuning, layout and rule of this instance
        #[arg(short, long)]
        instance: Option<String>,
        /// Truck icon template (overrides the instance's)
        #[arg(short, long)]
        template: Option<PathBuf>,
        /// Only run template matching
        #[arg(long)]
        no_ocr: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show config file path
    Path,
    /// Write an example configuration
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Validate the configuration
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = commands::resolve_config_path(cli.config.as_ref());

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    // The daemon also writes a daily rotated log file; keep the guard alive
    // so buffered lines are flushed on exit
    let (file_layer, _guard) = match &cli.command {
        Commands::Daemon => match daemon_file_writer(&config_path) {
            Some((writer, guard)) => (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                ),
                Some(guard),
            ),
            None => (None, None),
        },
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| daemon_level(&cli.command, log_level).into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    match cli.command {
        Commands::Run { instance } => {
            commands::run_command(&config_path, &instance, shutdown_token()).await?;
        }

        Commands::Stop { instance } => {
            commands::stop_command(&config_path, &instance)?;
        }

        Commands::Status { instance } => {
            commands::status_command(&config_path, instance.as_deref())?;
        }

        Commands::Logs { instance, lines } => {
            commands::logs_command(&config_path, &instance, lines)?;
        }

        Commands::Daemon => {
            commands::daemon_command(&config_path, shutdown_token()).await?;
        }

        Commands::Schedules => {
            commands::schedules_command(&config_path)?;
        }

        Commands::Inspect {
            image,
            instance,
            template,
            no_ocr,
        } => {
            commands::inspect_command(
                &config_path,
                &image,
                instance.as_deref(),
                template.as_deref(),
                no_ocr,
            )?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(&config_path)?,
            ConfigAction::Path => commands::config_path(&config_path)?,
            ConfigAction::Init { force } => commands::config_init(&config_path, force)?,
            ConfigAction::Check => commands::config_check(&config_path)?,
        },
    }

    Ok(())
}

/// The daemon logs at least at info so the log file records every start and stop
fn daemon_level<'a>(command: &Commands, level: &'a str) -> &'a str {
    match (command, level) {
        (Commands::Daemon, "warn") => "info",
        _ => level,
    }
}

/// Non-blocking writer for `<log_dir>/haulwatch.log.<date>`
fn daemon_file_writer(
    config_path: &Path,
) -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let log_dir = ConfigFile::load(config_path)
        .map(|file| file.general.log_dir)
        .unwrap_or_else(|_| GeneralConfig::default().log_dir);

    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!(
            "Warning: Failed to create log directory {:?}: {}",
            log_dir, e
        );
        return None;
    }

    let appender = tracing_appender::rolling::daily(&log_dir, "haulwatch.log");
    Some(tracing_appender::non_blocking(appender))
}

/// Token cancelled on Ctrl+C or SIGTERM
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    cancel
}
