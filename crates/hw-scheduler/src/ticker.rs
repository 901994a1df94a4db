//! Minute ticker that applies schedules

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime, Utc};
use tokio_util::sync::CancellationToken;

use hw_core::log_sink::JsonlLogSink;
use hw_core::InstanceKey;

use crate::schedule::{due_actions, Schedule, ScheduleAction};
use crate::supervisor::{StartOutcome, Supervisor};

/// Old activity log entries to drop once a day
pub struct LogRetention {
    pub sink: Arc<JsonlLogSink>,
    pub instances: Vec<InstanceKey>,
    pub keep_days: u32,
}

pub struct ScheduleTicker {
    schedules: Vec<Schedule>,
    supervisor: Arc<Supervisor>,
    interval: Duration,
    retention: Option<LogRetention>,
    last_prune: Option<NaiveDate>,
}

impl ScheduleTicker {
    pub fn new(schedules: Vec<Schedule>, supervisor: Arc<Supervisor>, interval: Duration) -> Self {
        Self {
            schedules,
            supervisor,
            interval,
            retention: None,
            last_prune: None,
        }
    }

    pub fn with_log_retention(mut self, retention: LogRetention) -> Self {
        if retention.keep_days > 0 {
            self.retention = Some(retention);
        }
        self
    }

    /// Tick until `cancel` fires
    pub async fn run(&mut self, cancel: CancellationToken) {
        tracing::info!(
            "Schedule ticker started ({} schedules, every {:?})",
            self.schedules.len(),
            self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let now = Local::now().naive_local();
                    self.tick(now);
                }
            }
        }

        tracing::info!("Schedule ticker stopped");
    }

    /// Apply every action due at `now`; returns what was done
    pub fn tick(&mut self, now: NaiveDateTime) -> Vec<ScheduleAction> {
        tracing::debug!("Checking schedules at {}", now.format("%Y-%m-%d %H:%M:%S"));

        let store = self.supervisor.store().clone();
        let actions = due_actions(&self.schedules, now, |key| {
            self.supervisor.is_live(key) || store.is_running(key).unwrap_or(false)
        });

        let mut applied = Vec::new();
        for action in actions {
            let ok = match &action {
                ScheduleAction::Start {
                    schedule,
                    instance,
                    rule,
                } => {
                    tracing::info!("Starting {} (schedule: {})", instance, schedule);
                    match self
                        .supervisor
                        .ensure_running(instance, Some(rule.clone()), Some(schedule))
                    {
                        Ok(StartOutcome::Started) => true,
                        Ok(outcome) => {
                            tracing::info!("Instance {} not started: {:?}", instance, outcome);
                            false
                        }
                        Err(e) => {
                            tracing::error!("Schedule {} failed to start {}: {}", schedule, instance, e);
                            false
                        }
                    }
                }
                ScheduleAction::Stop { schedule, instance } => {
                    tracing::info!("Stopping {} (schedule: {})", instance, schedule);
                    match self.supervisor.request_stop(instance) {
                        Ok(requested) => requested,
                        Err(e) => {
                            tracing::error!("Schedule {} failed to stop {}: {}", schedule, instance, e);
                            false
                        }
                    }
                }
            };
            if ok {
                applied.push(action);
            }
        }

        self.prune_logs(now.date());
        applied
    }

    fn prune_logs(&mut self, today: NaiveDate) {
        let Some(retention) = &self.retention else {
            return;
        };
        if self.last_prune == Some(today) {
            return;
        }
        self.last_prune = Some(today);

        let cutoff = Utc::now() - chrono::Duration::days(retention.keep_days as i64);
        for key in &retention.instances {
            match retention.sink.prune_before(key, cutoff) {
                Ok(0) => {}
                Ok(removed) => tracing::info!("Pruned {} old log entries of {}", removed, key),
                Err(e) => tracing::warn!("Failed to prune logs of {}: {}", key, e),
            }
        }
    }
}
