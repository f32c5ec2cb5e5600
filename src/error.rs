//! Error types for the test execution engine.
//!
//! Every variant raised after a job exists keeps enough context to find that
//! job again: either the job itself or its identifier.

use std::time::Duration;

use thiserror::Error;

use crate::connection::{CallError, CallErrorKind};
use crate::models::{CoverageSource, Stage, StrategyFailure, TestJob, TestRunReport};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Every submission strategy failed and analysis fallback is disabled.
    #[error("test submission failed: {}", describe_failures(.failures))]
    SubmissionFailed { failures: Vec<StrategyFailure> },

    /// A strategy started remote work but could not resolve the job it
    /// belongs to. The item ids identify that work; submitting again would
    /// start a second run.
    #[error(
        "{strategy} submission started but its job is unresolved (items {}): {message}",
        .item_ids.join(", ")
    )]
    SubmissionUnresolved {
        strategy: String,
        item_ids: Vec<String>,
        message: String,
    },

    /// The job did not reach a terminal state in time. The job keeps running
    /// remotely and can be checked again by id.
    #[error("job {} still {} after {:?}", .job.id, .job.status, .waited)]
    JobTimedOut { job: Box<TestJob>, waited: Duration },

    #[error("job {job_id} not found")]
    JobNotFound { job_id: String },

    /// The session is no longer usable. Retry after reconnecting.
    #[error("connection invalid during {stage}: {message}")]
    ConnectionInvalid { stage: Stage, message: String },

    /// The caller's deadline passed at a poll boundary.
    #[error("deadline exceeded while job {} was {}", .job.id, .job.status)]
    DeadlineExceeded { job: Box<TestJob> },

    /// A job exists but a later stage failed. The report holds everything
    /// gathered before the failure.
    #[error("partial result for job {}: {stage} stage failed: {cause}", .report.job.id)]
    PartialResult {
        report: Box<TestRunReport>,
        stage: Stage,
        cause: Box<Error>,
    },

    #[error("unrecognised stack trace: {0}")]
    MalformedStackTrace(String),

    #[error(
        "invalid coverage record for {class_name}: {lines_covered} covered of {lines_total}"
    )]
    InvalidCoverageRecord {
        class_name: String,
        lines_covered: i64,
        lines_total: i64,
    },

    #[error("no coverage source answered: {}", describe_sources(.failures))]
    CoverageUnavailable {
        failures: Vec<(CoverageSource, String)>,
    },

    #[error("malformed response during {stage}: {message}")]
    MalformedResponse { stage: Stage, message: String },

    #[error("remote call failed during {stage}: {source}")]
    Remote {
        stage: Stage,
        #[source]
        source: CallError,
    },
}

impl Error {
    /// Classify a failed remote call made during `stage`.
    pub fn from_call(stage: Stage, err: CallError) -> Self {
        match err.kind {
            CallErrorKind::InvalidSession => Error::ConnectionInvalid {
                stage,
                message: err.message,
            },
            _ => Error::Remote { stage, source: err },
        }
    }

    /// Whether repeating the whole call (possibly after reconnecting) can help.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ConnectionInvalid { .. }
            | Error::JobTimedOut { .. }
            | Error::DeadlineExceeded { .. } => true,
            Error::Remote { source, .. } => source.is_transient(),
            Error::PartialResult { cause, .. } => cause.is_retryable(),
            _ => false,
        }
    }

    /// The remote job this error relates to, when one exists.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Error::JobTimedOut { job, .. } | Error::DeadlineExceeded { job } => Some(job.id.as_str()),
            Error::JobNotFound { job_id } => Some(job_id.as_str()),
            Error::PartialResult { report, .. } => Some(report.job.id.as_str()),
            _ => None,
        }
    }

    /// The report carried by a partial result.
    pub fn partial_report(&self) -> Option<&TestRunReport> {
        match self {
            Error::PartialResult { report, .. } => Some(&**report),
            _ => None,
        }
    }
}

fn describe_failures(failures: &[StrategyFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.strategy, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_sources(failures: &[(CoverageSource, String)]) -> String {
    failures
        .iter()
        .map(|(source, reason)| format!("{:?}: {}", source, reason))
        .collect::<Vec<_>>()
        .join("; ")
}
