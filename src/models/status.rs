use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle of an asynchronous test job on the remote platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JobStatus {
    #[default]
    Queued,
    Processing,
    Completed,
    Failed,
    Aborted,
    /// Synthetic terminal state for analysis-mode jobs. Nothing ran.
    NotExecuted,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Aborted | JobStatus::NotExecuted
        )
    }

    /// Map the platform's job status string. Holding and Preparing are
    /// pre-execution states and count as queued.
    pub fn from_remote(value: &str) -> Option<Self> {
        match value {
            "Holding" | "Queued" | "Preparing" => Some(JobStatus::Queued),
            "Processing" => Some(JobStatus::Processing),
            "Completed" => Some(JobStatus::Completed),
            "Failed" => Some(JobStatus::Failed),
            "Aborted" => Some(JobStatus::Aborted),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Outcome of a single test method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Pass,
    Fail,
    CompileFail,
    Skip,
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Fail | Outcome::CompileFail)
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pass" => Ok(Outcome::Pass),
            "Fail" => Ok(Outcome::Fail),
            "CompileFail" => Ok(Outcome::CompileFail),
            "Skip" => Ok(Outcome::Skip),
            other => Err(format!("unknown test outcome '{}'", other)),
        }
    }
}
