//! Config command implementations

use std::path::Path;

use anyhow::{Context, Result};

use super::load_config_file;
use crate::output::{print_error, print_info, print_success, print_warning};

/// Annotated starting point written by `config init`
const EXAMPLE_CONFIG: &str = include_str!("../../config.example.toml");

/// Show current configuration
pub fn config_show(config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        print_warning(&format!("No configuration file found at {:?}", config_path));
        print_info("Run 'haulwatch config init' to create one");
        return Ok(());
    }

    print_info(&format!("Configuration file: {:?}", config_path));
    println!();

    let content = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
    println!("{}", content);

    Ok(())
}

/// Show config file path
pub fn config_path(config_path: &Path) -> Result<()> {
    println!("{}", config_path.display());
    Ok(())
}

/// Write the example configuration
pub fn config_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", config_path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    if let Some(dir) = config_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {:?}", dir))?;
            print_success(&format!("Created config directory: {:?}", dir));
        }
    }

    std::fs::write(config_path, EXAMPLE_CONFIG)
        .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

    print_success(&format!("Created configuration file: {:?}", config_path));
    print_info("Edit the [[instances]] entry, then check it with 'haulwatch config check'");
    Ok(())
}

/// Load and validate the configuration, then summarize it
pub fn config_check(config_path: &Path) -> Result<()> {
    let file = load_config_file(config_path)?;

    print_success(&format!("{} is valid", config_path.display()));
    println!(
        "  {} instance(s), {} schedule(s) ({} active)",
        file.instances.len(),
        file.schedules.len(),
        file.schedules.iter().filter(|s| s.active).count()
    );
    for instance in &file.instances {
        let schedules = file.schedules_for(&instance.key).count();
        println!(
            "  {}: {} via {} on local port {}, {} schedule(s)",
            instance.key,
            instance.resolution,
            instance.profile.destination(),
            instance.profile.local_port,
            schedules
        );
    }
    Ok(())
}
