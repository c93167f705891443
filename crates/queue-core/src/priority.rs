//! Priority levels.
//!
//! Priority is a signed integer sort key: lower values are served first.
//! The named levels are a convenience layer over the raw integer; both are
//! accepted everywhere a priority is expected.

use std::fmt;
use std::str::FromStr;

/// A job priority. Lower numeric value means more urgent.
///
/// Named levels resolve to fixed scores:
///
/// | level      | score |
/// |------------|-------|
/// | `critical` | -15   |
/// | `high`     | -10   |
/// | `medium`   | -5    |
/// | `normal`   | 0     |
/// | `low`      | 10    |
///
/// Any other string is parsed as a raw integer; anything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub i32);

impl Priority {
    pub const CRITICAL: Priority = Priority(-15);
    pub const HIGH: Priority = Priority(-10);
    pub const MEDIUM: Priority = Priority(-5);
    pub const NORMAL: Priority = Priority(0);
    pub const LOW: Priority = Priority(10);

    /// The raw sort-key value (lower = more urgent).
    pub fn score(&self) -> i32 {
        self.0
    }

    /// Resolve a named level or a numeric string. Unrecognized names fall
    /// through to numeric parsing, per the spec: "unrecognized names are
    /// interpreted as numeric".
    pub fn parse(input: &str) -> Result<Priority, PriorityParseError> {
        match input {
            "critical" => Ok(Priority::CRITICAL),
            "high" => Ok(Priority::HIGH),
            "medium" => Ok(Priority::MEDIUM),
            "normal" => Ok(Priority::NORMAL),
            "low" => Ok(Priority::LOW),
            other => other
                .parse::<i32>()
                .map(Priority)
                .map_err(|_| PriorityParseError(other.to_string())),
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

impl From<i32> for Priority {
    fn from(score: i32) -> Self {
        Priority(score)
    }
}

impl FromStr for Priority {
    type Err = PriorityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Priority::parse(s)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Input into `Job::priority(..)`: either a named level, a raw string that
/// parses as an integer, or a bare integer.
#[derive(Debug, Clone)]
pub enum PriorityLevel {
    Named(String),
    Score(i32),
}

impl From<&str> for PriorityLevel {
    fn from(s: &str) -> Self {
        PriorityLevel::Named(s.to_string())
    }
}

impl From<String> for PriorityLevel {
    fn from(s: String) -> Self {
        PriorityLevel::Named(s)
    }
}

impl From<i32> for PriorityLevel {
    fn from(score: i32) -> Self {
        PriorityLevel::Score(score)
    }
}

impl PriorityLevel {
    pub fn resolve(&self) -> Result<Priority, PriorityParseError> {
        match self {
            PriorityLevel::Named(name) => Priority::parse(name),
            PriorityLevel::Score(score) => Ok(Priority(*score)),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unrecognized priority: {0}")]
pub struct PriorityParseError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_levels_resolve_to_fixed_scores() {
        assert_eq!(Priority::parse("critical").unwrap().score(), -15);
        assert_eq!(Priority::parse("high").unwrap().score(), -10);
        assert_eq!(Priority::parse("medium").unwrap().score(), -5);
        assert_eq!(Priority::parse("normal").unwrap().score(), 0);
        assert_eq!(Priority::parse("low").unwrap().score(), 10);
    }

    #[test]
    fn unrecognized_names_are_numeric() {
        assert_eq!(Priority::parse("-42").unwrap().score(), -42);
        assert!(Priority::parse("urgent").is_err());
    }

    #[test]
    fn ordering_is_by_score_lower_first() {
        assert!(Priority::CRITICAL < Priority::HIGH);
        assert!(Priority::HIGH < Priority::NORMAL);
        assert!(Priority::NORMAL < Priority::LOW);
    }
}
