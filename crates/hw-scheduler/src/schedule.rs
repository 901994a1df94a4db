//! Time windows that start and stop one instance
//!
//! Schedules are checked once a minute. A start or end time counts as due
//! when the current minute is within one minute of it, so a tick that fires a
//! little early or late still catches the boundary.

use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use hw_core::config::AcceptanceRule;
use hw_core::error::ConfigError;
use hw_core::InstanceKey;

/// Minutes either side of a boundary that still count as due
const WINDOW_MINUTES: i64 = 1;

/// One start/end window of an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub name: String,

    /// Instance to start and stop
    pub instance: InstanceKey,

    /// Restrict to one weekday; `None` runs every day
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<Weekday>,

    /// Restrict to one calendar date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,

    /// Local time the instance is started, `HH:MM`
    #[serde(with = "clock_time")]
    pub start: NaiveTime,

    /// Local time the instance is stopped, `HH:MM`
    #[serde(with = "clock_time")]
    pub end: NaiveTime,

    #[serde(default = "default_active")]
    pub active: bool,

    /// Rule applied when this schedule starts the instance
    #[serde(default)]
    pub rule: AcceptanceRule,
}

fn default_active() -> bool {
    true
}

impl Schedule {
    /// Whether the schedule applies on `date`
    pub fn runs_on(&self, date: NaiveDate) -> bool {
        if let Some(only) = self.date {
            if only != date {
                return false;
            }
        }
        match self.day_of_week {
            Some(day) => date.weekday() == day,
            None => true,
        }
    }

    pub fn is_start_due(&self, now: NaiveDateTime) -> bool {
        self.active && self.runs_on(now.date()) && near(self.start, now.time())
    }

    pub fn is_end_due(&self, now: NaiveDateTime) -> bool {
        self.active && self.runs_on(now.date()) && near(self.end, now.time())
    }

    /// Whether both windows can be open at the same time.
    ///
    /// Schedules on the same weekday overlap when their times intersect; a
    /// schedule without a weekday is compared against every day.
    pub fn overlaps_with(&self, other: &Schedule) -> bool {
        let same_day = match (self.day_of_week, other.day_of_week) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        let same_date = match (self.date, other.date) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };

        same_day && same_date && self.start < other.end && self.end > other.start
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingField("schedules.name".to_string()));
        }
        if self.start >= self.end {
            return Err(ConfigError::Invalid(format!(
                "schedule '{}' must start before it ends ({} - {})",
                self.name,
                self.start.format("%H:%M"),
                self.end.format("%H:%M")
            )));
        }
        if let (Some(day), Some(date)) = (self.day_of_week, self.date) {
            if date.weekday() != day {
                return Err(ConfigError::Invalid(format!(
                    "schedule '{}' is dated {} which is not a {}",
                    self.name, date, day
                )));
            }
        }
        self.rule.validate()
    }

    /// Human-readable day filter
    pub fn day_label(&self) -> String {
        match (self.date, self.day_of_week) {
            (Some(date), _) => date.to_string(),
            (None, Some(day)) => day_name(day).to_string(),
            (None, None) => "Every day".to_string(),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} {}-{})",
            self.name,
            self.day_label(),
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

fn near(boundary: NaiveTime, now: NaiveTime) -> bool {
    let minute_of_day = |t: NaiveTime| (t.hour() * 60 + t.minute()) as i64;
    (minute_of_day(boundary) - minute_of_day(now)).abs() <= WINDOW_MINUTES
}

fn day_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// What a tick should do for one schedule
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleAction {
    Start {
        schedule: String,
        instance: InstanceKey,
        rule: AcceptanceRule,
    },
    Stop {
        schedule: String,
        instance: InstanceKey,
    },
}

/// Actions due at `now`.
///
/// A start is only due for an instance that is not running and a stop only
/// for one that is; `is_running` is asked once per candidate.
pub fn due_actions<F>(schedules: &[Schedule], now: NaiveDateTime, is_running: F) -> Vec<ScheduleAction>
where
    F: Fn(&InstanceKey) -> bool,
{
    let mut actions = Vec::new();
    for schedule in schedules {
        if schedule.is_start_due(now) && !is_running(&schedule.instance) {
            actions.push(ScheduleAction::Start {
                schedule: schedule.name.clone(),
                instance: schedule.instance.clone(),
                rule: schedule.rule.clone(),
            });
        }
        if schedule.is_end_due(now) && is_running(&schedule.instance) {
            actions.push(ScheduleAction::Stop {
                schedule: schedule.name.clone(),
                instance: schedule.instance.clone(),
            });
        }
    }
    actions
}

/// Serde helpers for `HH:MM` times
pub mod clock_time {
    use chrono::NaiveTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(s.trim(), "%H:%M:%S"))
            .map_err(|_| serde::de::Error::custom(format!("invalid time '{}', expected HH:MM", s)))
    }
}
