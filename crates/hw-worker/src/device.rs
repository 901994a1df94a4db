//! Debug-bridge control of the emulator
//!
//! After the tunnel is up the emulator's adb daemon is reachable on
//! `localhost:<local_port>`. Every command addresses that serial explicitly so
//! several instances can share one adb server.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hw_core::error::DeviceLinkError;
use hw_core::InstanceKey;
use hw_vision::{Frame, Point, Resolution};

use crate::process::{CommandError, CommandOutput, CommandRunner, CommandSpec};

/// Screen capture and input injection on one device
#[async_trait]
pub trait DeviceControl: Send {
    /// Attach to the device behind `local_port`
    async fn connect(&mut self, local_port: u16) -> Result<(), DeviceLinkError>;

    /// Detach; safe to call when not connected
    async fn disconnect(&mut self);

    /// Current screen, `None` on any failure
    async fn capture(&mut self) -> Option<Frame>;

    /// Tap at `point` and wait for the UI to settle; `false` on failure
    async fn tap(&mut self, point: Point) -> bool;

    /// Screen size reported by the device
    async fn screen_size(&mut self) -> Option<Resolution>;

    /// Local file holding the last capture, removed on cleanup
    fn capture_file(&self) -> Option<PathBuf> {
        None
    }
}

/// [`DeviceControl`] over the `adb` command-line client
pub struct AdbDeviceLink {
    runner: Arc<dyn CommandRunner>,
    adb: String,
    /// `localhost:<local_port>`, known before any connect
    target: String,
    /// Set once the target confirmed the connection
    serial: Option<String>,
    capture_name: String,
    capture_dir: PathBuf,
    command_timeout: Duration,
    tap_settle: Duration,
}

impl AdbDeviceLink {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        adb: impl Into<String>,
        instance: &InstanceKey,
        local_port: u16,
        capture_dir: impl Into<PathBuf>,
        command_timeout: Duration,
        tap_settle: Duration,
    ) -> Self {
        Self {
            runner,
            adb: adb.into(),
            target: device_serial(local_port),
            serial: None,
            capture_name: format!("screen_{}.png", instance.file_stem()),
            capture_dir: capture_dir.into(),
            command_timeout,
            tap_settle,
        }
    }

    /// Serial of the connected device
    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    /// Path of the screenshot on the device
    pub fn remote_capture_path(&self) -> String {
        format!("/sdcard/{}", self.capture_name)
    }

    /// Path of the pulled screenshot
    pub fn local_capture_path(&self) -> PathBuf {
        self.capture_dir.join(&self.capture_name)
    }

    async fn adb(&self, args: &[&str]) -> Result<CommandOutput, DeviceLinkError> {
        let mut spec = CommandSpec::new(&self.adb);
        if let Some(serial) = &self.serial {
            spec = spec.args(["-s", serial.as_str()]);
        }
        let spec = spec.args(args.iter().copied());
        let command = args.first().copied().unwrap_or_default().to_string();

        let output = self
            .runner
            .run(&spec, self.command_timeout)
            .await
            .map_err(|e| match e {
                CommandError::TimedOut { timeout, .. } => DeviceLinkError::TimedOut {
                    command: command.clone(),
                    timeout,
                },
                other => DeviceLinkError::Command {
                    command: command.clone(),
                    message: other.to_string(),
                },
            })?;

        if output.success() {
            Ok(output)
        } else {
            Err(DeviceLinkError::Command {
                command,
                message: format!("exit {:?}: {}", output.code, output.stderr.trim()),
            })
        }
    }

    async fn try_capture(&self) -> Result<Frame, String> {
        let remote = self.remote_capture_path();
        let local = self.local_capture_path();

        self.adb(&["shell", "screencap", "-p", remote.as_str()])
            .await
            .map_err(|e| e.to_string())?;

        tokio::fs::create_dir_all(&self.capture_dir)
            .await
            .map_err(|e| format!("cannot create {:?}: {}", self.capture_dir, e))?;
        let local_str = local.display().to_string();
        self.adb(&["pull", remote.as_str(), local_str.as_str()])
            .await
            .map_err(|e| e.to_string())?;

        let bytes = tokio::fs::read(&local)
            .await
            .map_err(|e| format!("cannot read {:?}: {}", local, e))?;
        tokio::task::spawn_blocking(move || Frame::from_encoded(&bytes))
            .await
            .map_err(|e| e.to_string())?
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl DeviceControl for AdbDeviceLink {
    async fn connect(&mut self, local_port: u16) -> Result<(), DeviceLinkError> {
        let serial = device_serial(local_port);
        self.target = serial.clone();
        self.serial = None;

        let output = self.adb(&["connect", serial.as_str()]).await?;
        let stdout = output.stdout.to_lowercase();
        if stdout.contains("connected to") || stdout.contains("already connected") {
            tracing::info!("adb connected to {}", serial);
            self.serial = Some(serial);
            Ok(())
        } else {
            Err(DeviceLinkError::NotConfirmed {
                serial,
                output: output.stdout.trim().to_string(),
            })
        }
    }

    async fn disconnect(&mut self) {
        // Always scoped to the target, so a session orphaned by a failed
        // connect or an earlier run is released too
        let was_connected = self.serial.take().is_some();
        let target = self.target.clone();
        if let Err(e) = self.adb(&["disconnect", target.as_str()]).await {
            if was_connected {
                tracing::warn!("adb disconnect {} failed: {}", target, e);
            } else {
                tracing::debug!("adb disconnect {}: {}", target, e);
            }
        }
    }

    async fn capture(&mut self) -> Option<Frame> {
        match self.try_capture().await {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!("Screen capture failed: {}", e);
                None
            }
        }
    }

    async fn tap(&mut self, point: Point) -> bool {
        let (x, y) = (point.x.to_string(), point.y.to_string());
        match self.adb(&["shell", "input", "tap", x.as_str(), y.as_str()]).await {
            Ok(_) => {
                tokio::time::sleep(self.tap_settle).await;
                true
            }
            Err(e) => {
                tracing::warn!("Tap at {} failed: {}", point, e);
                false
            }
        }
    }

    async fn screen_size(&mut self) -> Option<Resolution> {
        match self.adb(&["shell", "wm", "size"]).await {
            Ok(output) => parse_wm_size(&output.stdout),
            Err(e) => {
                tracing::debug!("wm size failed: {}", e);
                None
            }
        }
    }

    fn capture_file(&self) -> Option<PathBuf> {
        Some(self.local_capture_path())
    }
}

fn device_serial(local_port: u16) -> String {
    format!("localhost:{}", local_port)
}

/// Parse `wm size` output, preferring the override size over the physical one
pub fn parse_wm_size(output: &str) -> Option<Resolution> {
    let mut physical = None;
    let mut override_size = None;
    for line in output.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let Ok(size) = value.trim().parse::<Resolution>() else {
            continue;
        };
        if label.trim().eq_ignore_ascii_case("override size") {
            override_size = Some(size);
        } else if label.trim().eq_ignore_ascii_case("physical size") {
            physical = Some(size);
        }
    }
    override_size.or(physical)
}

/// Remove a pulled capture; a missing file is fine
pub async fn remove_capture(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
