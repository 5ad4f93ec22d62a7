//! Lifecycle states of a search and per-job counters.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregate state of one ElasticBLAST search, as observed from cluster
/// and job state plus the status markers in the results bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElbStatus {
    Creating,
    Submitting,
    Running,
    Success,
    Failure,
    Deleting,
    Unknown,
}

impl ElbStatus {
    /// True once the search can no longer make progress.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Unknown)
    }

    /// Exit code reported by `status --exit-code`.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for ElbStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "CREATING",
            Self::Submitting => "SUBMITTING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Deleting => "DELETING",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

/// Last-observed job counts for a search. Totals, not monotonic per job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl JobCounts {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending + self.running + self.succeeded + self.failed
    }
}

impl fmt::Display for JobCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pending {}\nRunning {}\nSucceeded {}\nFailed {}",
            self.pending, self.running, self.succeeded, self.failed
        )
    }
}
