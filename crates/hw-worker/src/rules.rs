//! Acceptance decision for one truck

use std::fmt;

use hw_core::config::AcceptanceRule;
use hw_vision::InfoReading;

/// Outcome of checking a reading against the rule
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Accept,
    /// Strength above the configured maximum
    TooStrong { strength: f64, max: f64 },
    /// Server restriction not met; `found` is `None` when it was not read
    WrongServer { expected: Option<u32>, found: Option<u32> },
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Accept => write!(f, "accepted"),
            Verdict::TooStrong { strength, max } => {
                write!(f, "strength {}M above limit {}M", strength, max)
            }
            Verdict::WrongServer {
                expected,
                found: Some(found),
            } => match expected {
                Some(expected) => write!(f, "server #{} is not #{}", found, expected),
                None => write!(f, "server #{} with no server configured", found),
            },
            Verdict::WrongServer { found: None, .. } => write!(f, "server not readable"),
        }
    }
}

/// Check `info` against `rule`.
///
/// A strength that was not read does not reject; a server that was not read
/// does when the server restriction is on.
pub fn evaluate(info: &InfoReading, rule: &AcceptanceRule) -> Verdict {
    if let Some(strength) = info.strength {
        if strength > rule.max_strength {
            return Verdict::TooStrong {
                strength,
                max: rule.max_strength,
            };
        }
    }

    if rule.server_restriction_enabled {
        let matches = match (info.server, rule.server_value) {
            (Some(found), Some(expected)) => found == expected,
            _ => false,
        };
        if !matches {
            return Verdict::WrongServer {
                expected: rule.server_value,
                found: info.server,
            };
        }
    }

    Verdict::Accept
}

/// Whether the truck should be shared
pub fn accepts(info: &InfoReading, rule: &AcceptanceRule) -> bool {
    evaluate(info, rule).is_accept()
}
