//! Acceptance rule for trucks

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConfigError;

/// In-game chat a truck is shared into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastChannel {
    Alliance,
    World,
}

impl fmt::Display for BroadcastChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BroadcastChannel::Alliance => write!(f, "alliance"),
            BroadcastChannel::World => write!(f, "world"),
        }
    }
}

/// Which trucks to share and where
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceptanceRule {
    /// Strongest truck (in millions) still accepted
    pub max_strength: f64,

    /// Only accept trucks from `server_value`
    pub server_restriction_enabled: bool,

    /// Required server number when the restriction is enabled
    pub server_value: Option<u32>,

    /// Share accepted trucks into the alliance chat
    pub share_alliance: bool,

    /// Share accepted trucks into the world chat
    pub share_world: bool,
}

impl Default for AcceptanceRule {
    fn default() -> Self {
        Self {
            max_strength: 30.0,
            server_restriction_enabled: false,
            server_value: None,
            share_alliance: true,
            share_world: false,
        }
    }
}

impl AcceptanceRule {
    /// Target chat, if any
    pub fn channel(&self) -> Option<BroadcastChannel> {
        match (self.share_alliance, self.share_world) {
            (true, false) => Some(BroadcastChannel::Alliance),
            (false, true) => Some(BroadcastChannel::World),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.max_strength.is_finite() || self.max_strength < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "rule.max_strength must be a non-negative number, got {}",
                self.max_strength
            )));
        }
        if self.share_alliance && self.share_world {
            return Err(ConfigError::Invalid(
                "rule.share_alliance and rule.share_world are mutually exclusive".to_string(),
            ));
        }
        if self.server_restriction_enabled && self.server_value.is_none() {
            return Err(ConfigError::MissingField("rule.server_value".to_string()));
        }
        Ok(())
    }
}
