//! Job lifecycle states.

use std::fmt;
use std::str::FromStr;

use crate::error::QueueError;

/// The five states a job can be in. See `spec.md` §3 and the GLOSSARY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Queued, awaiting a worker.
    Inactive,
    /// Claimed by a worker, running.
    Active,
    /// Finished successfully.
    Complete,
    /// Exhausted its attempts.
    Failed,
    /// Not yet eligible; promotion-time gated.
    Delayed,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Inactive,
        JobState::Active,
        JobState::Complete,
        JobState::Failed,
        JobState::Delayed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Inactive => "inactive",
            JobState::Active => "active",
            JobState::Complete => "complete",
            JobState::Failed => "failed",
            JobState::Delayed => "delayed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(JobState::Inactive),
            "active" => Ok(JobState::Active),
            "complete" => Ok(JobState::Complete),
            "failed" => Ok(JobState::Failed),
            "delayed" => Ok(JobState::Delayed),
            other => Err(QueueError::InvalidState(other.to_string())),
        }
    }
}
