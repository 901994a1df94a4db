//! Owner of running workers
//!
//! The supervisor is the only writer of run records for the instances it
//! starts. Starting is idempotent: a live task or a record owned by another
//! live process means the instance is already running. Applying a rule and
//! marking the instance running is a single record write.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hw_core::config::{AcceptanceRule, BotConfig, GeneralConfig};
use hw_core::error::ConfigError;
use hw_core::{InstanceKey, LogSink, RunRecord, RunStateStore, RunStatus};
use hw_worker::Worker;

use crate::backoff::ExponentialBackoff;
use crate::config::{ConfigFile, SchedulerConfig};
use crate::error::SchedulerError;

/// Starts one instance and runs it until it stops
#[async_trait]
pub trait InstanceRunner: Send + Sync {
    /// `Ok(false)` when the instance could not be started and may be retried
    async fn run(&self, config: BotConfig, cancel: CancellationToken) -> Result<bool, ConfigError>;
}

/// [`InstanceRunner`] backed by a real [`Worker`]
pub struct WorkerRunner {
    general: GeneralConfig,
    store: Arc<dyn RunStateStore>,
    sink: Arc<dyn LogSink>,
}

impl WorkerRunner {
    pub fn new(general: GeneralConfig, store: Arc<dyn RunStateStore>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            general,
            store,
            sink,
        }
    }
}

#[async_trait]
impl InstanceRunner for WorkerRunner {
    async fn run(&self, config: BotConfig, cancel: CancellationToken) -> Result<bool, ConfigError> {
        let mut worker =
            Worker::with_system_tools(config, &self.general, self.store.clone(), self.sink.clone())?;
        Ok(worker.run_to_completion(cancel).await)
    }
}

/// Outcome of [`Supervisor::ensure_running`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A task of this supervisor already runs the instance
    AlreadyRunning,
    /// The record is owned by another live process
    OwnedElsewhere { pid: u32 },
}

struct InstanceHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Everything a start task needs, cloned out of the supervisor
#[derive(Clone)]
struct StartPolicy {
    store: Arc<dyn RunStateStore>,
    runner: Arc<dyn InstanceRunner>,
    settings: SchedulerConfig,
    pid: u32,
}

pub struct Supervisor {
    instances: HashMap<InstanceKey, BotConfig>,
    policy: StartPolicy,
    handles: DashMap<InstanceKey, InstanceHandle>,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(
        instances: impl IntoIterator<Item = BotConfig>,
        settings: SchedulerConfig,
        store: Arc<dyn RunStateStore>,
        runner: Arc<dyn InstanceRunner>,
    ) -> Self {
        Self {
            instances: instances
                .into_iter()
                .map(|config| (config.key.clone(), config))
                .collect(),
            policy: StartPolicy {
                store,
                runner,
                settings,
                pid: std::process::id(),
            },
            handles: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Supervisor over every instance of `file` driving real workers
    pub fn from_config(file: &ConfigFile, store: Arc<dyn RunStateStore>, sink: Arc<dyn LogSink>) -> Self {
        let runner = WorkerRunner::new(file.general.clone(), store.clone(), sink);
        Self::new(
            file.instances.iter().cloned(),
            file.scheduler.clone(),
            store,
            Arc::new(runner),
        )
    }

    pub fn store(&self) -> &Arc<dyn RunStateStore> {
        &self.policy.store
    }

    /// Apply `rule` (or the configured one) and make sure the instance runs.
    ///
    /// `schedule` names the schedule responsible for the start, if any.
    pub fn ensure_running(
        &self,
        key: &InstanceKey,
        rule: Option<AcceptanceRule>,
        schedule: Option<&str>,
    ) -> Result<StartOutcome, SchedulerError> {
        let mut config = self
            .instances
            .get(key)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownInstance(key.clone()))?;
        if let Some(rule) = rule {
            rule.validate()?;
            config.rule = rule;
        }

        if self.is_live(key) {
            tracing::debug!("Instance {} already has a running task", key);
            return Ok(StartOutcome::AlreadyRunning);
        }

        if let Some(record) = self.policy.store.record(key)? {
            if let Some(pid) = record.pid {
                if pid != self.policy.pid && record.effective_status() != RunStatus::Stopped {
                    tracing::info!("Instance {} is owned by process {}", key, pid);
                    return Ok(StartOutcome::OwnedElsewhere { pid });
                }
            }
        }

        let mut record = RunRecord::running(self.policy.pid, config.rule.clone());
        if let Some(name) = schedule {
            record = record.with_schedule(name);
        }
        self.policy.store.write(key, &record)?;

        tracing::info!(
            "Starting instance {}{}",
            key,
            schedule.map(|s| format!(" (schedule: {})", s)).unwrap_or_default()
        );
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(supervise(self.policy.clone(), config, cancel.clone()));
        self.handles.insert(key.clone(), InstanceHandle { cancel, task });

        Ok(StartOutcome::Started)
    }

    /// Ask the instance to stop after its current cycle.
    ///
    /// Returns `false` when it was not running.
    pub fn request_stop(&self, key: &InstanceKey) -> Result<bool, SchedulerError> {
        if !self.instances.contains_key(key) {
            return Err(SchedulerError::UnknownInstance(key.clone()));
        }

        let requested = request_stop(self.policy.store.as_ref(), key)?;
        if let Some(handle) = self.handles.get(key) {
            handle.cancel.cancel();
        }
        Ok(requested)
    }

    /// Whether a task of this supervisor still runs the instance
    pub fn is_live(&self, key: &InstanceKey) -> bool {
        self.handles
            .get(key)
            .map(|h| !h.task.is_finished())
            .unwrap_or(false)
    }

    /// Keys with a live task, sorted
    pub fn live_instances(&self) -> Vec<InstanceKey> {
        let mut keys: Vec<_> = self
            .handles
            .iter()
            .filter(|h| !h.task.is_finished())
            .map(|h| h.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Wait for the task of `key` to finish
    pub async fn wait(&self, key: &InstanceKey) {
        if let Some((_, handle)) = self.handles.remove(key) {
            if let Err(e) = handle.task.await {
                tracing::error!("Task of instance {} failed: {}", key, e);
            }
        }
    }

    /// Cancel every task without waiting for them
    pub fn cancel_all(&self) {
        self.shutdown.cancel();
    }

    /// Cancel every task and wait for all of them to clean up
    pub async fn shutdown(&self) {
        self.cancel_all();

        let keys: Vec<_> = self.handles.iter().map(|h| h.key().clone()).collect();
        for key in keys {
            self.wait(&key).await;
        }
        tracing::info!("Supervisor stopped");
    }
}

/// Mark a running instance as stop-requested.
///
/// Used by the supervisor and by processes that do not own the worker.
pub fn request_stop(store: &dyn RunStateStore, key: &InstanceKey) -> Result<bool, SchedulerError> {
    match store.record(key)? {
        Some(record) if record.effective_status() == RunStatus::Running => {
            store.write(key, &record.stop_requested())?;
            tracing::info!("Stop requested for instance {}", key);
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Start attempts with backoff, then the run, then the final record
async fn supervise(policy: StartPolicy, config: BotConfig, cancel: CancellationToken) {
    let key = config.key.clone();
    let max_attempts = policy.settings.max_start_attempts.max(1);
    let mut backoff = ExponentialBackoff::from_config(&policy.settings.backoff);

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() || !still_wanted(&policy, &key) {
            break;
        }

        match policy.runner.run(config.clone(), cancel.clone()).await {
            Ok(true) => {
                tracing::info!("Instance {} finished", key);
                break;
            }
            Ok(false) if attempt < max_attempts => {
                let delay = backoff.next_delay();
                tracing::warn!(
                    "Instance {} failed to start (attempt {}/{}). Retrying in {:?}",
                    key,
                    attempt,
                    max_attempts,
                    delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Ok(false) => {
                tracing::error!(
                    "Instance {} failed to start after {} attempts; giving up",
                    key,
                    max_attempts
                );
            }
            Err(e) => {
                tracing::error!("Instance {} cannot run: {}", key, e);
                break;
            }
        }
    }

    mark_stopped(&policy, &key);
}

/// Whether the record still asks this process to run the instance
fn still_wanted(policy: &StartPolicy, key: &InstanceKey) -> bool {
    match policy.store.record(key) {
        Ok(Some(record)) => record.status == RunStatus::Running && record.pid == Some(policy.pid),
        Ok(None) => false,
        Err(e) => {
            tracing::error!("Cannot read run state of {}: {}", key, e);
            false
        }
    }
}

/// Write `Stopped` unless another process has taken the instance over
fn mark_stopped(policy: &StartPolicy, key: &InstanceKey) {
    let owned = match policy.store.record(key) {
        Ok(Some(record)) => record.pid.is_none() || record.pid == Some(policy.pid),
        Ok(None) => true,
        Err(_) => true,
    };
    if !owned {
        return;
    }
    if let Err(e) = policy.store.write(key, &RunRecord::stopped()) {
        tracing::error!("Failed to mark instance {} stopped: {}", key, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hw_core::config::{ConnectionProfile, Credential};
    use hw_core::run_state::MemoryRunStateStore;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// How a fake run behaves
    #[derive(Clone, Copy)]
    enum Script {
        /// Start fails
        Fail,
        /// Start succeeds; run until cancelled or the record leaves `Running`
        RunUntilStopped,
        /// Configuration is unusable
        BadConfig,
    }

    struct FakeRunner {
        store: Arc<MemoryRunStateStore>,
        script: Mutex<VecDeque<Script>>,
        launches: AtomicUsize,
        rules: Mutex<Vec<AcceptanceRule>>,
    }

    impl FakeRunner {
        fn new(store: Arc<MemoryRunStateStore>, script: &[Script]) -> Arc<Self> {
            Arc::new(Self {
                store,
                script: Mutex::new(script.iter().copied().collect()),
                launches: AtomicUsize::new(0),
                rules: Mutex::new(Vec::new()),
            })
        }

        fn launches(&self) -> usize {
            self.launches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InstanceRunner for FakeRunner {
        async fn run(&self, config: BotConfig, cancel: CancellationToken) -> Result<bool, ConfigError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            self.rules.lock().unwrap().push(config.rule.clone());
            let step = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Script::RunUntilStopped);

            match step {
                Script::Fail => Ok(false),
                Script::BadConfig => Err(ConfigError::Invalid("template missing".to_string())),
                Script::RunUntilStopped => {
                    loop {
                        if cancel.is_cancelled() || !self.store.is_running(&config.key).unwrap() {
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                    Ok(true)
                }
            }
        }
    }

    fn instance(key: &str) -> BotConfig {
        BotConfig::new(
            key,
            ConnectionProfile {
                host: "gw.example.net".to_string(),
                port: 22,
                username: "player".to_string(),
                credential: Credential::KeyFile {
                    path: PathBuf::from("/keys/id_rsa"),
                },
                remote_service: "adb-proxy".to_string(),
                remote_port: 5555,
                local_port: 15555,
            },
            "/assets/truck.png",
        )
    }

    fn supervisor(script: &[Script]) -> (Supervisor, Arc<FakeRunner>, Arc<MemoryRunStateStore>) {
        let store = Arc::new(MemoryRunStateStore::new());
        let runner = FakeRunner::new(store.clone(), script);
        let settings = SchedulerConfig {
            max_start_attempts: 3,
            ..Default::default()
        };
        let supervisor = Supervisor::new(vec![instance("alpha")], settings, store.clone(), runner.clone());
        (supervisor, runner, store)
    }

    fn alpha() -> InstanceKey {
        InstanceKey::new("alpha")
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_running_twice_starts_once() {
        let (supervisor, runner, store) = supervisor(&[Script::RunUntilStopped]);

        assert_eq!(
            supervisor.ensure_running(&alpha(), None, None).unwrap(),
            StartOutcome::Started
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            supervisor.ensure_running(&alpha(), None, None).unwrap(),
            StartOutcome::AlreadyRunning
        );
        assert_eq!(runner.launches(), 1);
        assert!(store.is_running(&alpha()).unwrap());

        supervisor.shutdown().await;
        assert_eq!(store.status(&alpha()).unwrap(), RunStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rule_applied_with_running_record() {
        let (supervisor, runner, store) = supervisor(&[Script::RunUntilStopped]);
        let rule = AcceptanceRule {
            max_strength: 55.0,
            share_alliance: false,
            share_world: true,
            ..Default::default()
        };

        supervisor
            .ensure_running(&alpha(), Some(rule.clone()), Some("evening"))
            .unwrap();
        let record = store.record(&alpha()).unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Running);
        assert_eq!(record.rule, Some(rule.clone()));
        assert_eq!(record.schedule.as_deref(), Some("evening"));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*runner.rules.lock().unwrap(), vec![rule]);
        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_rule_rejected_before_start() {
        let (supervisor, runner, store) = supervisor(&[]);
        let rule = AcceptanceRule {
            share_alliance: true,
            share_world: true,
            ..Default::default()
        };

        let err = supervisor.ensure_running(&alpha(), Some(rule), None).unwrap_err();
        assert!(matches!(err, SchedulerError::Config(_)));
        assert!(store.record(&alpha()).unwrap().is_none());
        assert_eq!(runner.launches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_request_marks_record_and_ends_task() {
        let (supervisor, _runner, store) = supervisor(&[Script::RunUntilStopped]);
        supervisor.ensure_running(&alpha(), None, None).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(supervisor.request_stop(&alpha()).unwrap());
        assert_eq!(store.status(&alpha()).unwrap(), RunStatus::StopRequested);

        supervisor.wait(&alpha()).await;
        assert!(!supervisor.is_live(&alpha()));
        assert_eq!(store.status(&alpha()).unwrap(), RunStatus::Stopped);

        // Nothing left to stop
        assert!(!supervisor.request_stop(&alpha()).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_retried_then_given_up() {
        let (supervisor, runner, store) = supervisor(&[Script::Fail, Script::Fail, Script::Fail]);
        supervisor.ensure_running(&alpha(), None, None).unwrap();

        supervisor.wait(&alpha()).await;
        assert_eq!(runner.launches(), 3);
        assert_eq!(store.status(&alpha()).unwrap(), RunStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_recovers() {
        let (supervisor, runner, store) = supervisor(&[Script::Fail, Script::RunUntilStopped]);
        supervisor.ensure_running(&alpha(), None, None).unwrap();

        // First backoff delay is 5 s plus up to 25% jitter
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(runner.launches(), 2);
        assert!(store.is_running(&alpha()).unwrap());

        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_error_not_retried() {
        let (supervisor, runner, store) = supervisor(&[Script::BadConfig]);
        supervisor.ensure_running(&alpha(), None, None).unwrap();

        supervisor.wait(&alpha()).await;
        assert_eq!(runner.launches(), 1);
        assert_eq!(store.status(&alpha()).unwrap(), RunStatus::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn test_record_of_other_live_process_respected() {
        let (supervisor, runner, store) = supervisor(&[]);
        // The parent of the test process is alive and is not us
        let other = std::os::unix::process::parent_id();
        store
            .write(&alpha(), &RunRecord::running(other, AcceptanceRule::default()))
            .unwrap();

        assert_eq!(
            supervisor.ensure_running(&alpha(), None, None).unwrap(),
            StartOutcome::OwnedElsewhere { pid: other }
        );
        assert_eq!(runner.launches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_instance() {
        let (supervisor, _runner, _store) = supervisor(&[]);
        let ghost = InstanceKey::new("ghost");
        assert!(matches!(
            supervisor.ensure_running(&ghost, None, None),
            Err(SchedulerError::UnknownInstance(_))
        ));
        assert!(matches!(
            supervisor.request_stop(&ghost),
            Err(SchedulerError::UnknownInstance(_))
        ));
    }
}
