//! Per-instance worker configuration

use hw_vision::{Resolution, DEFAULT_MATCH_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::profile::ConnectionProfile;
use super::rule::AcceptanceRule;
use super::serde_utils::{duration_millis, duration_secs};
use crate::error::ConfigError;
use crate::layout::UiLayout;
use crate::types::InstanceKey;

/// Everything one worker needs, read once at construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Identifies the instance in run records, logs and capture files
    pub key: InstanceKey,

    /// Tunnel and forward settings
    pub profile: ConnectionProfile,

    /// Expected device screen; the device's reported size wins when available
    #[serde(default)]
    pub resolution: Resolution,

    /// Which trucks to share and where
    #[serde(default)]
    pub rule: AcceptanceRule,

    /// Truck icon, cut from a screenshot at the layout's reference resolution
    pub template_path: PathBuf,

    #[serde(default)]
    pub matcher: MatcherConfig,

    #[serde(default)]
    pub ocr: OcrConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    /// Replaces the built-in tap table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<UiLayout>,
}

impl BotConfig {
    /// Create a config with default tuning
    pub fn new(
        key: impl Into<InstanceKey>,
        profile: ConnectionProfile,
        template_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            key: key.into(),
            profile,
            resolution: Resolution::default(),
            rule: AcceptanceRule::default(),
            template_path: template_path.into(),
            matcher: MatcherConfig::default(),
            ocr: OcrConfig::default(),
            timing: TimingConfig::default(),
            layout: None,
        }
    }

    /// Layout to resolve at connect time
    pub fn layout(&self) -> UiLayout {
        self.layout.clone().unwrap_or_default()
    }

    /// Check every section; the worker refuses to start on error
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key.as_str().trim().is_empty() {
            return Err(ConfigError::MissingField("key".to_string()));
        }
        if self.template_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("template_path".to_string()));
        }
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "[{}] resolution must be non-zero",
                self.key
            )));
        }
        self.profile.validate()?;
        self.rule.validate()?;
        self.matcher.validate()?;
        self.ocr.validate()
    }
}

/// Template matching tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Minimum correlation for a hit
    pub threshold: f32,

    /// Downsampling factor of the coarse search; 1 searches exhaustively
    pub pyramid_factor: u32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            pyramid_factor: 4,
        }
    }
}

impl MatcherConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "matcher.threshold must be in (0, 1], got {}",
                self.threshold
            )));
        }
        if self.pyramid_factor == 0 {
            return Err(ConfigError::Invalid(
                "matcher.pyramid_factor must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// OCR engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// tesseract binary
    pub binary: String,

    /// Page segmentation mode
    pub psm: u8,

    /// Integer enlargement of each crop before recognition
    pub upscale: u32,

    /// Restrict recognized characters
    pub whitelist: Option<String>,

    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            psm: 7,
            upscale: 2,
            whitelist: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl OcrConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.upscale == 0 {
            return Err(ConfigError::Invalid(
                "ocr.upscale must be at least 1".to_string(),
            ));
        }
        if self.binary.trim().is_empty() {
            return Err(ConfigError::MissingField("ocr.binary".to_string()));
        }
        Ok(())
    }
}

/// Delays and timeouts of the run, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Wait after every tap
    #[serde(with = "duration_millis")]
    pub tap_settle: Duration,

    /// Wait for the detail view after tapping the icon
    #[serde(with = "duration_millis")]
    pub detail_open: Duration,

    /// Wait for the channel picker after tapping share
    #[serde(with = "duration_millis")]
    pub after_share: Duration,

    /// Wait after picking the channel
    #[serde(with = "duration_millis")]
    pub after_channel: Duration,

    /// Wait after confirming the share
    #[serde(with = "duration_millis")]
    pub after_confirm: Duration,

    /// Wait after tapping refresh
    #[serde(with = "duration_millis")]
    pub after_refresh: Duration,

    /// Pause between cycles
    #[serde(with = "duration_millis")]
    pub cycle_delay: Duration,

    /// Upper bound for ssh to set up the forward
    #[serde(with = "duration_millis")]
    pub tunnel_timeout: Duration,

    /// Wait after ssh returns before the forward is used
    #[serde(with = "duration_millis")]
    pub tunnel_settle: Duration,

    /// Upper bound for every adb invocation
    #[serde(with = "duration_millis")]
    pub command_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tap_settle: Duration::from_millis(500),
            detail_open: Duration::from_millis(1500),
            after_share: Duration::from_millis(1000),
            after_channel: Duration::from_millis(500),
            after_confirm: Duration::from_millis(1000),
            after_refresh: Duration::from_millis(1000),
            cycle_delay: Duration::from_millis(3000),
            tunnel_timeout: Duration::from_millis(10_000),
            tunnel_settle: Duration::from_millis(3000),
            command_timeout: Duration::from_millis(10_000),
        }
    }
}

impl TimingConfig {
    /// All delays zero and short timeouts; for tests against fakes
    pub fn immediate() -> Self {
        Self {
            tap_settle: Duration::ZERO,
            detail_open: Duration::ZERO,
            after_share: Duration::ZERO,
            after_channel: Duration::ZERO,
            after_confirm: Duration::ZERO,
            after_refresh: Duration::ZERO,
            cycle_delay: Duration::ZERO,
            tunnel_timeout: Duration::from_secs(1),
            tunnel_settle: Duration::ZERO,
            command_timeout: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credential;

    const MINIMAL: &str = r#"
        key = "alpha"
        template_path = "assets/truck.png"

        [profile]
        host = "gw.example.net"
        username = "player"
        local_port = 15555
        credential = { type = "key_file", path = "/keys/alpha" }
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: BotConfig = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.key, InstanceKey::new("alpha"));
        assert_eq!(config.resolution, Resolution::REFERENCE);
        assert_eq!(config.matcher.threshold, 0.7);
        assert_eq!(config.timing.cycle_delay, Duration::from_secs(3));
        assert_eq!(config.timing.tap_settle, Duration::from_millis(500));
        assert_eq!(config.ocr.psm, 7);
        assert!(config.layout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_timing_override() {
        let toml_str = format!("{}\n[timing]\ncycle_delay = 5000\n", MINIMAL);
        let config: BotConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.timing.cycle_delay, Duration::from_secs(5));
        assert_eq!(config.timing.detail_open, Duration::from_millis(1500));
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = BotConfig::new(
            "alpha",
            ConnectionProfile {
                host: "h".to_string(),
                port: 22,
                username: "u".to_string(),
                credential: Credential::KeyFile {
                    path: PathBuf::from("/k"),
                },
                remote_service: "adb-proxy".to_string(),
                remote_port: 5555,
                local_port: 15555,
            },
            "t.png",
        );
        assert!(config.validate().is_ok());

        config.matcher.threshold = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_propagates_rule_errors() {
        let mut config: BotConfig = toml::from_str(MINIMAL).unwrap();
        config.rule.share_world = true;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
