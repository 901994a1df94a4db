//! Terminal output for the CLI
//!
//! Tables are rendered with `tabled`; one-line status messages are coloured
//! with `crossterm`.

use chrono::{DateTime, Utc};
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use tabled::{settings::Style, Table, Tabled};

use hw_core::config::AcceptanceRule;
use hw_core::{InstanceKey, LogEntry, LogLevel, RunRecord, RunStatus};
use hw_scheduler::Schedule;

/// One row of `haulwatch status`
pub struct InstanceStatus {
    pub key: InstanceKey,
    pub status: RunStatus,
    pub record: Option<RunRecord>,
    pub configured_rule: AcceptanceRule,
}

/// Format instance states as a table
pub fn format_status(rows: &[InstanceStatus], now: DateTime<Utc>) -> String {
    if rows.is_empty() {
        return "No instances configured".to_string();
    }

    #[derive(Tabled)]
    struct StatusRow {
        #[tabled(rename = "INSTANCE")]
        instance: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "RULE")]
        rule: String,
        #[tabled(rename = "SCHEDULE")]
        schedule: String,
        #[tabled(rename = "UPDATED")]
        updated: String,
    }

    let rows: Vec<StatusRow> = rows
        .iter()
        .map(|row| {
            let record = row.record.as_ref();
            let rule = record
                .and_then(|r| r.rule.as_ref())
                .unwrap_or(&row.configured_rule);
            StatusRow {
                instance: row.key.to_string(),
                status: row.status.to_string(),
                pid: record
                    .and_then(|r| r.pid)
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                rule: describe_rule(rule),
                schedule: record
                    .and_then(|r| r.schedule.clone())
                    .unwrap_or_else(|| "-".to_string()),
                updated: record
                    .map(|r| {
                        let age = (now - r.updated_at).num_seconds().max(0) as u64;
                        format!("{} ago", format_duration(age))
                    })
                    .unwrap_or_else(|| "never".to_string()),
            }
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format schedules as a table
pub fn format_schedules(schedules: &[Schedule]) -> String {
    if schedules.is_empty() {
        return "No schedules configured".to_string();
    }

    #[derive(Tabled)]
    struct ScheduleRow {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "INSTANCE")]
        instance: String,
        #[tabled(rename = "DAY")]
        day: String,
        #[tabled(rename = "START")]
        start: String,
        #[tabled(rename = "END")]
        end: String,
        #[tabled(rename = "RULE")]
        rule: String,
        #[tabled(rename = "ACTIVE")]
        active: String,
    }

    let rows: Vec<ScheduleRow> = schedules
        .iter()
        .map(|s| ScheduleRow {
            name: s.name.clone(),
            instance: s.instance.to_string(),
            day: s.day_label(),
            start: s.start.format("%H:%M").to_string(),
            end: s.end.format("%H:%M").to_string(),
            rule: describe_rule(&s.rule),
            active: if s.active { "yes" } else { "no" }.to_string(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Short summary such as `<=30M, #49, alliance`
pub fn describe_rule(rule: &AcceptanceRule) -> String {
    let mut parts = vec![format!("<={}M", rule.max_strength)];
    if rule.server_restriction_enabled {
        match rule.server_value {
            Some(server) => parts.push(format!("#{}", server)),
            None => parts.push("#?".to_string()),
        }
    }
    parts.push(
        rule.channel()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "no share".to_string()),
    );
    parts.join(", ")
}

/// Print one activity entry, coloured by level
pub fn print_log_entry(entry: &LogEntry) {
    let color = match entry.level {
        LogLevel::Info => Color::Reset,
        LogLevel::Success => Color::Green,
        LogLevel::Warning => Color::Yellow,
        LogLevel::Error => Color::Red,
    };
    let local = entry.timestamp.with_timezone(&chrono::Local);

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        Print(local.format("%Y-%m-%d %H:%M:%S ").to_string()),
        SetForegroundColor(color),
        Print(format!("{:<7} ", entry.level.to_string())),
        ResetColor,
        Print(&entry.message),
        Print("\n")
    );
}

/// Format duration in human-readable form
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

fn print_colored(mut out: impl std::io::Write, color: Color, symbol: &str, msg: &str) {
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(symbol),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    print_colored(std::io::stdout(), Color::Green, "✓ ", msg);
}

/// Print an error message in red to stderr
pub fn print_error(msg: &str) {
    print_colored(std::io::stderr(), Color::Red, "✗ ", msg);
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    print_colored(std::io::stderr(), Color::Yellow, "⚠ ", msg);
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    print_colored(std::io::stdout(), Color::Cyan, "ℹ ", msg);
}
