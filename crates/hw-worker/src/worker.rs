//! The share loop of one instance
//!
//! A worker owns one tunnel and one device link for the lifetime of a run.
//! Every cycle captures the screen, looks for the truck icon, reads the detail
//! view and either shares the truck or skips it. Nothing inside a cycle runs
//! concurrently; the loop only checks for a stop between cycles.

use std::path::Path;
use std::sync::Arc;

use hw_core::config::{BotConfig, BroadcastChannel, GeneralConfig};
use hw_core::error::{BotError, CleanupError, ConfigError, CycleError};
use hw_core::{LogSink, ResolvedLayout, RunStateStore, RunStatus};
use hw_vision::{
    Frame, InfoReading, InfoRegions, MatchResult, Point, Resolution, Template, TemplateMatcher,
    TesseractCli, TextExtractor, TextRecognizer,
};
use tokio_util::sync::CancellationToken;

use crate::device::{remove_capture, AdbDeviceLink, DeviceControl};
use crate::log::BotLogger;
use crate::process::{CommandRunner, SystemCommandRunner};
use crate::rules::{self, Verdict};
use crate::tunnel::TunnelManager;

/// Lifecycle of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// What one cycle did
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No icon on screen; refresh tapped
    NoTruck,
    /// Truck failed the rule; refresh tapped
    Rejected { info: InfoReading, verdict: Verdict },
    /// Truck passed but no channel is configured; refresh tapped
    NotShared { info: InfoReading },
    /// Truck shared
    Shared {
        info: InfoReading,
        channel: BroadcastChannel,
    },
}

/// Counters over one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub cycles: u64,
    pub shared: u64,
    pub rejected: u64,
    pub empty: u64,
    pub failed: u64,
}

impl RunStats {
    fn record(&mut self, result: &Result<CycleOutcome, CycleError>) {
        self.cycles += 1;
        match result {
            Ok(CycleOutcome::Shared { .. }) => self.shared += 1,
            Ok(CycleOutcome::Rejected { .. }) | Ok(CycleOutcome::NotShared { .. }) => {
                self.rejected += 1
            }
            Ok(CycleOutcome::NoTruck) => self.empty += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Collaborators of a worker
pub struct WorkerParts {
    pub tunnel: TunnelManager,
    pub device: Box<dyn DeviceControl>,
    pub recognizer: Arc<dyn TextRecognizer>,
    pub store: Arc<dyn RunStateStore>,
    pub sink: Arc<dyn LogSink>,
}

/// Per-run state resolved once the device's screen size is known
#[derive(Clone)]
struct Session {
    layout: ResolvedLayout,
    template: Arc<Template>,
    extractor: Arc<TextExtractor>,
}

/// One instance's share loop
pub struct Worker {
    config: BotConfig,
    tunnel: TunnelManager,
    device: Box<dyn DeviceControl>,
    recognizer: Arc<dyn TextRecognizer>,
    store: Arc<dyn RunStateStore>,
    logger: BotLogger,
    matcher: TemplateMatcher,
    template: Template,
    session: Option<Session>,
    phase: RunPhase,
    stats: RunStats,
}

impl Worker {
    /// Create a worker.
    ///
    /// Configuration is validated and the template loaded here; both are the
    /// only errors that reach the caller.
    pub fn new(config: BotConfig, parts: WorkerParts) -> Result<Self, ConfigError> {
        config.validate()?;
        let template = Template::load(&config.template_path).map_err(ConfigError::Template)?;
        let matcher = TemplateMatcher::new(config.matcher.threshold, config.matcher.pyramid_factor);
        let logger = BotLogger::new(config.key.clone(), parts.sink);

        Ok(Self {
            config,
            tunnel: parts.tunnel,
            device: parts.device,
            recognizer: parts.recognizer,
            store: parts.store,
            logger,
            matcher,
            template,
            session: None,
            phase: RunPhase::Idle,
            stats: RunStats::default(),
        })
    }

    /// Create a worker that drives the real ssh, adb and tesseract binaries
    pub fn with_system_tools(
        config: BotConfig,
        general: &GeneralConfig,
        store: Arc<dyn RunStateStore>,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self, ConfigError> {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
        let timing = &config.timing;

        let tunnel = TunnelManager::new(
            runner.clone(),
            general.tools.clone(),
            &config.profile,
            timing.tunnel_timeout,
            timing.tunnel_settle,
        );
        let device = AdbDeviceLink::new(
            runner,
            general.tools.adb.clone(),
            &config.key,
            config.profile.local_port,
            general.capture_dir.clone(),
            timing.command_timeout,
            timing.tap_settle,
        );
        let recognizer = TesseractCli {
            binary: config.ocr.binary.clone(),
            psm: config.ocr.psm,
            whitelist: config.ocr.whitelist.clone(),
            timeout: config.ocr.timeout,
        };

        Self::new(
            config,
            WorkerParts {
                tunnel,
                device: Box::new(device),
                recognizer: Arc::new(recognizer),
                store,
                sink,
            },
        )
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Open the tunnel and connect the device.
    ///
    /// Any failure is logged, resources are released, and `false` returned.
    pub async fn start(&mut self) -> bool {
        if self.phase == RunPhase::Running {
            return true;
        }

        self.phase = RunPhase::Starting;
        match self.setup().await {
            Ok(resolution) => {
                self.phase = RunPhase::Running;
                self.logger
                    .info(format!("Bot started ({} screen)", resolution));
                true
            }
            Err(e) => {
                self.logger.error(format!("Start failed: {}", e));
                self.cleanup().await;
                false
            }
        }
    }

    async fn setup(&mut self) -> Result<Resolution, BotError> {
        self.logger.info("Setting up SSH tunnel...");
        self.tunnel.open(&self.config.profile).await?;

        self.logger.info("Connecting to device...");
        self.device.connect(self.config.profile.local_port).await?;

        let resolution = match self.device.screen_size().await {
            Some(reported) => {
                if reported != self.config.resolution {
                    self.logger.warning(format!(
                        "Device reports {} instead of configured {}; scaling layout",
                        reported, self.config.resolution
                    ));
                }
                reported
            }
            None => self.config.resolution,
        };

        self.session = Some(self.prepare_session(resolution));
        Ok(resolution)
    }

    fn prepare_session(&self, resolution: Resolution) -> Session {
        let layout = self.config.layout();
        let resolved = layout.resolve(resolution);
        let template = self.template.for_resolution(layout.reference(), resolution);
        let extractor = TextExtractor::new(
            self.recognizer.clone(),
            InfoRegions {
                strength: resolved.strength,
                server: resolved.server,
            },
            self.config.ocr.upscale,
        );

        Session {
            layout: resolved,
            template: Arc::new(template),
            extractor: Arc::new(extractor),
        }
    }

    /// Cycle until the run state leaves `Running` or `cancel` fires, then
    /// clean up
    pub async fn run(&mut self, cancel: CancellationToken) {
        if self.phase != RunPhase::Running {
            tracing::warn!("run() called on worker {} in phase {:?}", self.config.key, self.phase);
            return;
        }

        self.logger.info("Starting main bot loop...");
        loop {
            if cancel.is_cancelled() {
                self.logger.info("Stop signal received");
                break;
            }

            match self.store.status(&self.config.key) {
                Ok(RunStatus::Running) => {}
                Ok(status) => {
                    self.logger.info(format!("Run state is {}; stopping", status));
                    break;
                }
                Err(e) => {
                    self.logger
                        .error(format!("Cannot read run state ({}); stopping", e));
                    break;
                }
            }

            tracing::debug!("[{}] cycle {}", self.config.key, self.stats.cycles + 1);
            let result = self.run_cycle().await;
            self.stats.record(&result);
            if let Err(e) = result {
                self.logger.warning(format!("Cycle error: {}", e));
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.logger.info("Stop signal received");
                    break;
                }
                _ = tokio::time::sleep(self.config.timing.cycle_delay) => {}
            }
        }

        self.cleanup().await;
    }

    /// `start`, then `run` if it succeeded; returns whether the run started
    pub async fn run_to_completion(&mut self, cancel: CancellationToken) -> bool {
        if !self.start().await {
            return false;
        }
        self.run(cancel).await;
        true
    }

    /// One capture, locate and act iteration
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        let session = self.session.clone().ok_or(CycleError::NotStarted)?;
        let layout = session.layout;
        let timing = self.config.timing.clone();

        let frame = self.device.capture().await.ok_or(CycleError::CaptureFailed)?;
        let Some(hit) = locate(self.matcher.clone(), frame, session.template.clone()).await? else {
            self.logger.info("No truck found in this cycle");
            self.tap("refresh", layout.refresh).await?;
            tokio::time::sleep(timing.after_refresh).await;
            return Ok(CycleOutcome::NoTruck);
        };

        self.logger.info(format!(
            "Truck found at {} (confidence {:.2})",
            hit.center, hit.confidence
        ));
        self.tap("truck icon", hit.center).await?;
        tokio::time::sleep(timing.detail_open).await;

        let info = match self.device.capture().await {
            Some(detail) => read_info(session.extractor.clone(), detail).await?,
            None => {
                self.logger.warning("Could not capture truck details");
                InfoReading::default()
            }
        };
        self.logger.info(format!("Read truck info: {}", info));

        let verdict = rules::evaluate(&info, &self.config.rule);
        if !verdict.is_accept() {
            self.logger.info(format!("Truck skipped: {}", verdict));
            self.tap("refresh", layout.refresh).await?;
            tokio::time::sleep(timing.after_refresh).await;
            return Ok(CycleOutcome::Rejected { info, verdict });
        }

        let Some(channel) = self.config.rule.channel() else {
            self.logger
                .warning("Truck accepted but no share channel is configured");
            self.tap("refresh", layout.refresh).await?;
            tokio::time::sleep(timing.after_refresh).await;
            return Ok(CycleOutcome::NotShared { info });
        };

        self.tap("share", layout.share).await?;
        tokio::time::sleep(timing.after_share).await;

        let (channel_button, confirm_button) = layout.channel_targets(channel);
        self.tap("channel", channel_button).await?;
        tokio::time::sleep(timing.after_channel).await;
        self.tap("confirm", confirm_button).await?;

        self.logger
            .success(format!("Truck shared to {} chat! {}", channel, info));
        tokio::time::sleep(timing.after_confirm).await;

        self.tap("refresh", layout.refresh).await?;
        tokio::time::sleep(timing.after_refresh).await;

        Ok(CycleOutcome::Shared { info, channel })
    }

    async fn tap(&mut self, target: &str, point: Point) -> Result<(), CycleError> {
        if self.device.tap(point).await {
            Ok(())
        } else {
            Err(CycleError::TapFailed {
                target: target.to_string(),
                point,
            })
        }
    }

    /// Release the device link, the tunnel and the local capture.
    ///
    /// Safe to call any number of times from any phase; never fails.
    pub async fn cleanup(&mut self) {
        let first = self.phase != RunPhase::Stopped;
        self.phase = RunPhase::Stopping;
        if first {
            self.logger.info("Cleaning up...");
        }

        self.device.disconnect().await;
        self.tunnel.close().await;

        if let Some(path) = self.device.capture_file() {
            if let Err(e) = discard_capture(&path).await {
                self.logger.warning(e.to_string());
            }
        }

        self.session = None;
        self.phase = RunPhase::Stopped;
        if first {
            let stats = self.stats;
            self.logger.info(format!(
                "Cleanup complete ({} cycles, {} shared, {} skipped, {} failed)",
                stats.cycles, stats.shared, stats.rejected, stats.failed
            ));
        }
    }
}

async fn locate(
    matcher: TemplateMatcher,
    frame: Frame,
    template: Arc<Template>,
) -> Result<Option<MatchResult>, CycleError> {
    tokio::task::spawn_blocking(move || matcher.locate(&frame, &template))
        .await
        .map_err(|e| CycleError::Task(e.to_string()))
}

async fn read_info(extractor: Arc<TextExtractor>, frame: Frame) -> Result<InfoReading, CycleError> {
    tokio::task::spawn_blocking(move || extractor.read(&frame))
        .await
        .map_err(|e| CycleError::Task(e.to_string()))
}

async fn discard_capture(path: &Path) -> Result<(), CleanupError> {
    remove_capture(path)
        .await
        .map_err(|source| CleanupError::RemoveCapture {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandOutput;
    use crate::testing::ScriptedRunner;
    use async_trait::async_trait;
    use hw_core::config::{AcceptanceRule, ConnectionProfile, Credential, TimingConfig, ToolPaths};
    use hw_core::error::DeviceLinkError;
    use hw_core::log_sink::MemoryLogSink;
    use hw_core::run_state::MemoryRunStateStore;
    use hw_core::{InstanceKey, LogLevel, RunRecord};
    use hw_vision::VisionError;
    use image::{DynamicImage, GrayImage, Rgb, RgbImage};
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const ICON_AT: Point = Point::new(37, 21);
    const ICON_CENTER: Point = Point::new(37 + 12, 21 + 8);

    fn blocky_icon() -> RgbImage {
        RgbImage::from_fn(24, 16, |x, y| {
            if ((x / 4) * 7 + (y / 4) * 3) % 5 < 2 {
                Rgb([240, 200, 30])
            } else {
                Rgb([20, 40, 90])
            }
        })
    }

    fn noise_image(width: u32, height: u32) -> RgbImage {
        let mut state = 17u32;
        RgbImage::from_fn(width, height, |_, _| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let v = (state >> 16) as u8;
            Rgb([v, v, v])
        })
    }

    fn list_frame() -> Frame {
        let mut img = noise_image(160, 120);
        image::imageops::replace(&mut img, &blocky_icon(), ICON_AT.x as i64, ICON_AT.y as i64);
        Frame::from_rgb(img)
    }

    fn empty_frame() -> Frame {
        Frame::from_rgb(noise_image(160, 120))
    }

    fn detail_frame() -> Frame {
        Frame::from_rgb(RgbImage::from_pixel(720, 1280, Rgb([30, 30, 30])))
    }

    /// Answers OCR calls in order: strength box first, then server box
    struct ScriptedRecognizer {
        replies: Mutex<VecDeque<String>>,
    }

    impl ScriptedRecognizer {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            })
        }
    }

    impl TextRecognizer for ScriptedRecognizer {
        fn recognize_line(&self, _image: &GrayImage) -> Result<String, VisionError> {
            Ok(self.replies.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    /// Device fed from a queue of captures
    #[derive(Default)]
    struct FakeDevice {
        frames: VecDeque<Option<Frame>>,
        taps: Arc<Mutex<Vec<Point>>>,
        disconnects: Arc<AtomicUsize>,
        fail_taps: bool,
        refuse_connect: bool,
        capture_file: Option<PathBuf>,
        /// Once the queue is drained, ask the worker to stop
        stop_when_drained: Option<(Arc<MemoryRunStateStore>, InstanceKey)>,
    }

    #[async_trait]
    impl DeviceControl for FakeDevice {
        async fn connect(&mut self, local_port: u16) -> Result<(), DeviceLinkError> {
            if self.refuse_connect {
                return Err(DeviceLinkError::NotConfirmed {
                    serial: format!("localhost:{}", local_port),
                    output: "Connection refused".to_string(),
                });
            }
            Ok(())
        }

        async fn disconnect(&mut self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }

        async fn capture(&mut self) -> Option<Frame> {
            match self.frames.pop_front() {
                Some(frame) => frame,
                None => {
                    if let Some((store, key)) = &self.stop_when_drained {
                        let current = store.record(key).unwrap().unwrap();
                        store.write(key, &current.stop_requested()).unwrap();
                    }
                    None
                }
            }
        }

        async fn tap(&mut self, point: Point) -> bool {
            self.taps.lock().unwrap().push(point);
            !self.fail_taps
        }

        async fn screen_size(&mut self) -> Option<Resolution> {
            None
        }

        fn capture_file(&self) -> Option<PathBuf> {
            self.capture_file.clone()
        }
    }

    struct Harness {
        worker: Worker,
        runner: ScriptedRunner,
        taps: Arc<Mutex<Vec<Point>>>,
        disconnects: Arc<AtomicUsize>,
        store: Arc<MemoryRunStateStore>,
        sink: Arc<MemoryLogSink>,
        _dir: tempfile::TempDir,
    }

    fn write_template(dir: &Path) -> PathBuf {
        let path = dir.join("truck.png");
        DynamicImage::ImageRgb8(blocky_icon()).save(&path).unwrap();
        path
    }

    fn config(template: PathBuf, rule: AcceptanceRule) -> BotConfig {
        let profile = ConnectionProfile {
            host: "gw.example.net".to_string(),
            port: 2222,
            username: "player".to_string(),
            credential: Credential::KeyFile {
                path: PathBuf::from("/keys/alpha"),
            },
            remote_service: "adb-proxy".to_string(),
            remote_port: 5555,
            local_port: 15555,
        };
        let mut config = BotConfig::new("alpha@example.com", profile, template);
        config.rule = rule;
        config.matcher.pyramid_factor = 1;
        config.ocr.upscale = 1;
        config.timing = TimingConfig::immediate();
        config
    }

    fn harness(
        rule: AcceptanceRule,
        mut device: FakeDevice,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let store = Arc::new(MemoryRunStateStore::new());
        let sink = Arc::new(MemoryLogSink::new());
        let taps = device.taps.clone();
        let disconnects = device.disconnects.clone();
        if device.stop_when_drained.is_some() {
            device.stop_when_drained = Some((store.clone(), InstanceKey::new("alpha@example.com")));
        }

        let config = config(write_template(dir.path()), rule);
        let tunnel = TunnelManager::new(
            Arc::new(runner.clone()),
            ToolPaths::default(),
            &config.profile,
            Duration::from_secs(1),
            Duration::ZERO,
        );
        let worker = Worker::new(
            config,
            WorkerParts {
                tunnel,
                device: Box::new(device),
                recognizer,
                store: store.clone(),
                sink: sink.clone(),
            },
        )
        .unwrap();

        Harness {
            worker,
            runner,
            taps,
            disconnects,
            store,
            sink,
            _dir: dir,
        }
    }

    fn queued(frames: Vec<Option<Frame>>) -> FakeDevice {
        FakeDevice {
            frames: frames.into(),
            ..Default::default()
        }
    }

    const SHARE: Point = Point::new(450, 1100);
    const ALLIANCE: Point = Point::new(300, 700);
    const ALLIANCE_CONFIRM: Point = Point::new(400, 750);
    const REFRESH: Point = Point::new(680, 70);

    #[tokio::test]
    async fn test_accepted_truck_is_shared_to_alliance() {
        let mut h = harness(
            AcceptanceRule::default(),
            queued(vec![Some(list_frame()), Some(detail_frame())]),
            ScriptedRecognizer::new(&["25.5M", "#49"]),
        );
        assert!(h.worker.start().await);
        assert_eq!(h.worker.phase(), RunPhase::Running);

        let outcome = h.worker.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Shared {
                info: InfoReading {
                    strength: Some(25.5),
                    server: Some(49)
                },
                channel: BroadcastChannel::Alliance,
            }
        );
        assert_eq!(
            *h.taps.lock().unwrap(),
            vec![ICON_CENTER, SHARE, ALLIANCE, ALLIANCE_CONFIRM, REFRESH]
        );
        let successes = h.sink.messages(LogLevel::Success);
        assert_eq!(successes.len(), 1);
        assert!(successes[0].contains("alliance"));
    }

    #[tokio::test]
    async fn test_world_channel_targets() {
        let rule = AcceptanceRule {
            share_alliance: false,
            share_world: true,
            ..Default::default()
        };
        let mut h = harness(
            rule,
            queued(vec![Some(list_frame()), Some(detail_frame())]),
            ScriptedRecognizer::new(&["10M", "#1"]),
        );
        assert!(h.worker.start().await);
        h.worker.run_cycle().await.unwrap();

        let taps = h.taps.lock().unwrap().clone();
        assert_eq!(taps[2], Point::new(300, 450));
        assert_eq!(taps[3], Point::new(400, 750));
    }

    #[tokio::test]
    async fn test_too_strong_truck_is_skipped() {
        let mut h = harness(
            AcceptanceRule::default(),
            queued(vec![Some(list_frame()), Some(detail_frame())]),
            ScriptedRecognizer::new(&["45M", "#49"]),
        );
        assert!(h.worker.start().await);

        let outcome = h.worker.run_cycle().await.unwrap();
        assert!(matches!(
            outcome,
            CycleOutcome::Rejected {
                verdict: Verdict::TooStrong { .. },
                ..
            }
        ));
        assert_eq!(*h.taps.lock().unwrap(), vec![ICON_CENTER, REFRESH]);
        assert!(h.sink.messages(LogLevel::Success).is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_server_fails_restriction() {
        let rule = AcceptanceRule {
            server_restriction_enabled: true,
            server_value: Some(49),
            ..Default::default()
        };
        let mut h = harness(
            rule,
            queued(vec![Some(list_frame()), Some(detail_frame())]),
            ScriptedRecognizer::new(&["12M", "???"]),
        );
        assert!(h.worker.start().await);

        let outcome = h.worker.run_cycle().await.unwrap();
        assert!(matches!(
            outcome,
            CycleOutcome::Rejected {
                verdict: Verdict::WrongServer { found: None, .. },
                ..
            }
        ));
        assert_eq!(*h.taps.lock().unwrap(), vec![ICON_CENTER, REFRESH]);
    }

    #[tokio::test]
    async fn test_no_channel_taps_refresh_only() {
        let rule = AcceptanceRule {
            share_alliance: false,
            share_world: false,
            ..Default::default()
        };
        let mut h = harness(
            rule,
            queued(vec![Some(list_frame()), Some(detail_frame())]),
            ScriptedRecognizer::new(&["5M", "#2"]),
        );
        assert!(h.worker.start().await);

        let outcome = h.worker.run_cycle().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::NotShared { .. }));
        assert_eq!(*h.taps.lock().unwrap(), vec![ICON_CENTER, REFRESH]);
        assert_eq!(h.sink.messages(LogLevel::Warning).len(), 1);
    }

    #[tokio::test]
    async fn test_no_truck_taps_refresh() {
        let mut h = harness(
            AcceptanceRule::default(),
            queued(vec![Some(empty_frame())]),
            ScriptedRecognizer::new(&[]),
        );
        assert!(h.worker.start().await);

        assert_eq!(h.worker.run_cycle().await.unwrap(), CycleOutcome::NoTruck);
        assert_eq!(*h.taps.lock().unwrap(), vec![REFRESH]);
    }

    #[tokio::test]
    async fn test_capture_failure_taps_nothing() {
        let mut h = harness(
            AcceptanceRule::default(),
            queued(vec![None]),
            ScriptedRecognizer::new(&[]),
        );
        assert!(h.worker.start().await);

        let err = h.worker.run_cycle().await.unwrap_err();
        assert!(matches!(err, CycleError::CaptureFailed));
        assert!(h.taps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_tap_aborts_sequence() {
        let device = FakeDevice {
            fail_taps: true,
            ..queued(vec![Some(list_frame()), Some(detail_frame())])
        };
        let mut h = harness(
            AcceptanceRule::default(),
            device,
            ScriptedRecognizer::new(&["10M", "#1"]),
        );
        assert!(h.worker.start().await);

        let err = h.worker.run_cycle().await.unwrap_err();
        match err {
            CycleError::TapFailed { target, point } => {
                assert_eq!(target, "truck icon");
                assert_eq!(point, ICON_CENTER);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(h.taps.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_detail_capture_reads_empty_info() {
        let mut h = harness(
            AcceptanceRule::default(),
            queued(vec![Some(list_frame()), None]),
            ScriptedRecognizer::new(&[]),
        );
        assert!(h.worker.start().await);

        let outcome = h.worker.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Shared {
                info: InfoReading::default(),
                channel: BroadcastChannel::Alliance,
            }
        );
    }

    #[tokio::test]
    async fn test_cycle_before_start_is_error() {
        let mut h = harness(
            AcceptanceRule::default(),
            FakeDevice::default(),
            ScriptedRecognizer::new(&[]),
        );
        let err = h.worker.run_cycle().await.unwrap_err();
        assert!(matches!(err, CycleError::NotStarted));
    }

    #[tokio::test]
    async fn test_start_failure_cleans_up() {
        let mut h = harness(
            AcceptanceRule::default(),
            FakeDevice::default(),
            ScriptedRecognizer::new(&[]),
        );
        h.runner
            .on_output("ssh ", CommandOutput::failed(255, "Connection refused"));

        assert!(!h.worker.start().await);
        assert_eq!(h.worker.phase(), RunPhase::Stopped);
        assert_eq!(h.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(h.sink.messages(LogLevel::Error).len(), 1);
        assert!(h.taps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_device_refusal_closes_tunnel() {
        let device = FakeDevice {
            refuse_connect: true,
            ..Default::default()
        };
        let mut h = harness(AcceptanceRule::default(), device, ScriptedRecognizer::new(&[]));

        assert!(!h.worker.start().await);
        let lines = h.runner.command_lines();
        assert_eq!(lines.last().unwrap(), "pkill -f 15555:adb-proxy");
    }

    #[tokio::test]
    async fn test_run_stops_when_state_leaves_running() {
        let device = FakeDevice {
            stop_when_drained: Some((
                Arc::new(MemoryRunStateStore::new()),
                InstanceKey::new("placeholder"),
            )),
            ..queued(vec![Some(empty_frame()), Some(empty_frame())])
        };
        let mut h = harness(AcceptanceRule::default(), device, ScriptedRecognizer::new(&[]));
        let key = h.worker.config().key.clone();
        h.store
            .write(&key, &RunRecord::running(std::process::id(), AcceptanceRule::default()))
            .unwrap();

        assert!(h.worker.run_to_completion(CancellationToken::new()).await);

        let stats = h.worker.stats();
        assert_eq!(stats.cycles, 3);
        assert_eq!(stats.empty, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(h.worker.phase(), RunPhase::Stopped);
        assert_eq!(h.disconnects.load(Ordering::SeqCst), 1);
        // The worker only reads the run state
        assert_eq!(h.store.status(&key).unwrap(), RunStatus::StopRequested);
    }

    #[tokio::test]
    async fn test_run_without_record_does_no_cycles() {
        let mut h = harness(
            AcceptanceRule::default(),
            queued(vec![Some(empty_frame())]),
            ScriptedRecognizer::new(&[]),
        );
        assert!(h.worker.run_to_completion(CancellationToken::new()).await);
        assert_eq!(h.worker.stats().cycles, 0);
        assert!(h.taps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_run_does_no_cycles() {
        let mut h = harness(
            AcceptanceRule::default(),
            queued(vec![Some(empty_frame())]),
            ScriptedRecognizer::new(&[]),
        );
        let key = h.worker.config().key.clone();
        h.store
            .write(&key, &RunRecord::running(std::process::id(), AcceptanceRule::default()))
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(h.worker.run_to_completion(cancel).await);
        assert_eq!(h.worker.stats().cycles, 0);
        assert_eq!(h.worker.phase(), RunPhase::Stopped);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("screen_alpha.png");
        std::fs::write(&capture, b"png").unwrap();
        let device = FakeDevice {
            capture_file: Some(capture.clone()),
            ..Default::default()
        };
        let mut h = harness(AcceptanceRule::default(), device, ScriptedRecognizer::new(&[]));
        assert!(h.worker.start().await);

        h.worker.cleanup().await;
        h.worker.cleanup().await;

        assert!(!capture.exists());
        assert_eq!(h.worker.phase(), RunPhase::Stopped);
        assert_eq!(h.disconnects.load(Ordering::SeqCst), 2);
        assert!(h.sink.messages(LogLevel::Warning).is_empty());
        assert!(h.sink.messages(LogLevel::Error).is_empty());
        let kills = h
            .runner
            .command_lines()
            .iter()
            .filter(|l| l.starts_with("pkill"))
            .count();
        // One before opening, then one per cleanup
        assert_eq!(kills, 3);
    }

    #[tokio::test]
    async fn test_cleanup_before_start_still_releases() {
        let mut h = harness(
            AcceptanceRule::default(),
            FakeDevice::default(),
            ScriptedRecognizer::new(&[]),
        );

        h.worker.cleanup().await;

        assert_eq!(h.worker.phase(), RunPhase::Stopped);
        assert_eq!(h.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(h.runner.command_lines(), vec!["pkill -f 15555:adb-proxy"]);
        assert!(h.sink.messages(LogLevel::Warning).is_empty());
    }

    #[test]
    fn test_missing_template_is_config_error() {
        let cfg = config(
            PathBuf::from("/nonexistent/truck.png"),
            AcceptanceRule::default(),
        );
        let tunnel = TunnelManager::new(
            Arc::new(ScriptedRunner::new()),
            ToolPaths::default(),
            &cfg.profile,
            Duration::from_secs(1),
            Duration::ZERO,
        );
        let result = Worker::new(
            cfg,
            WorkerParts {
                tunnel,
                device: Box::new(FakeDevice::default()),
                recognizer: ScriptedRecognizer::new(&[]),
                store: Arc::new(MemoryRunStateStore::new()),
                sink: Arc::new(MemoryLogSink::new()),
            },
        );
        assert!(matches!(result, Err(ConfigError::Template(_))));
    }
}
