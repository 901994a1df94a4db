//! SSH connection profile of one emulator

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::ConfigError;

/// Where the emulator's debug bridge is reachable and how to forward it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    /// SSH gateway host
    pub host: String,

    /// SSH gateway port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// SSH user
    pub username: String,

    /// Authentication material
    pub credential: Credential,

    /// Host name of the debug-bridge proxy as seen from the gateway
    #[serde(default = "default_remote_service")]
    pub remote_service: String,

    /// Debug-bridge port on the proxy
    #[serde(default = "default_remote_port")]
    pub remote_port: u16,

    /// Local end of the forward; must be unique per instance
    pub local_port: u16,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_remote_service() -> String {
    "adb-proxy".to_string()
}

fn default_remote_port() -> u16 {
    5555
}

impl ConnectionProfile {
    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }

    /// Argument of `ssh -L`
    pub fn forward_spec(&self) -> String {
        format!(
            "{}:{}:{}",
            self.local_port, self.remote_service, self.remote_port
        )
    }

    /// Substring that identifies this forward in a process listing
    pub fn forward_signature(&self) -> String {
        format!("{}:{}", self.local_port, self.remote_service)
    }

    /// Check required fields
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingField("profile.host".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(ConfigError::MissingField("profile.username".to_string()));
        }
        if self.remote_service.trim().is_empty() {
            return Err(ConfigError::MissingField(
                "profile.remote_service".to_string(),
            ));
        }
        if self.local_port == 0 {
            return Err(ConfigError::Invalid(
                "profile.local_port must be non-zero".to_string(),
            ));
        }
        self.credential.validate()
    }
}

/// SSH authentication material
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// Private key already on disk
    KeyFile { path: PathBuf },
    /// Inline private key, written to a private temp file while the tunnel is up
    Key { pem: String },
    /// Password, handed to `sshpass` through its environment
    Password { password: String },
}

impl Credential {
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Credential::KeyFile { path } if path.as_os_str().is_empty() => Err(
                ConfigError::MissingField("profile.credential.path".to_string()),
            ),
            Credential::Key { pem } if pem.trim().is_empty() => Err(ConfigError::MissingField(
                "profile.credential.pem".to_string(),
            )),
            Credential::Password { password } if password.is_empty() => Err(
                ConfigError::MissingField("profile.credential.password".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::KeyFile { path } => f.debug_struct("KeyFile").field("path", path).finish(),
            Credential::Key { .. } => f.debug_struct("Key").field("pem", &"<redacted>").finish(),
            Credential::Password { .. } => f
                .debug_struct("Password")
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}
