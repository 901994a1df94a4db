//! The haulwatch configuration file

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hw_core::config::serde_utils::duration_secs;
use hw_core::config::{self, BotConfig, GeneralConfig};
use hw_core::error::ConfigError;
use hw_core::InstanceKey;

use crate::schedule::Schedule;

/// Everything in `config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub general: GeneralConfig,

    pub scheduler: SchedulerConfig,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<BotConfig>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub schedules: Vec<Schedule>,
}

impl ConfigFile {
    /// Load and validate
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file: ConfigFile = config::load_config(path)?;
        file.validate()?;
        Ok(file)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        config::save_config(path, self)
    }

    pub fn instance(&self, key: &InstanceKey) -> Option<&BotConfig> {
        self.instances.iter().find(|i| &i.key == key)
    }

    /// Schedules of one instance
    pub fn schedules_for<'a>(&'a self, key: &'a InstanceKey) -> impl Iterator<Item = &'a Schedule> {
        self.schedules.iter().filter(move |s| &s.instance == key)
    }

    /// Check every instance and schedule.
    ///
    /// Instances must not share a key or a local port, and schedules of one
    /// instance must not overlap.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;

        let mut keys = HashSet::new();
        let mut stems = HashMap::new();
        let mut ports = HashSet::new();
        for instance in &self.instances {
            instance.validate()?;
            if !keys.insert(instance.key.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "instance '{}' is defined twice",
                    instance.key
                )));
            }
            // Case-insensitive file systems fold `Alpha` and `alpha` together
            let stem = instance.key.file_stem().to_ascii_lowercase();
            if let Some(other) = stems.insert(stem, &instance.key) {
                return Err(ConfigError::Invalid(format!(
                    "instances '{}' and '{}' would share state and capture files",
                    other, instance.key
                )));
            }
            if !ports.insert(instance.profile.local_port) {
                return Err(ConfigError::Invalid(format!(
                    "instance '{}' reuses local port {}",
                    instance.key, instance.profile.local_port
                )));
            }
        }

        for (i, schedule) in self.schedules.iter().enumerate() {
            schedule.validate()?;
            if !keys.contains(&schedule.instance) {
                return Err(ConfigError::Invalid(format!(
                    "schedule '{}' refers to unknown instance '{}'",
                    schedule.name, schedule.instance
                )));
            }
            let clash = self.schedules[i + 1..]
                .iter()
                .filter(|other| other.instance == schedule.instance && other.active)
                .find(|other| schedule.active && schedule.overlaps_with(other));
            if let Some(other) = clash {
                return Err(ConfigError::Invalid(format!(
                    "schedules '{}' and '{}' overlap",
                    schedule.name, other.name
                )));
            }
        }

        Ok(())
    }
}

/// Supervisor and ticker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval between schedule checks, in seconds
    #[serde(with = "duration_secs")]
    pub tick: Duration,

    /// Delay between failed start attempts
    pub backoff: BackoffConfig,

    /// Start attempts before an instance is given up
    pub max_start_attempts: u32,

    /// Days of activity log kept per instance; 0 keeps everything
    pub log_retention_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(60),
            backoff: BackoffConfig::default(),
            max_start_attempts: 3,
            log_retention_days: 7,
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick.is_zero() || self.tick > Duration::from_secs(60) {
            return Err(ConfigError::Invalid(
                "scheduler.tick must be between 1 and 60 seconds".to_string(),
            ));
        }
        if self.max_start_attempts == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_start_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First delay, in seconds
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Largest delay, in seconds
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(120),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}
