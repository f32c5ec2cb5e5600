//! Test execution and coverage aggregation for a remote platform.
//!
//! The engine submits asynchronous test runs through an ordered chain of
//! submission strategies, polls the resulting job, attributes failures to
//! source lines, and fuses coverage from several platform sources into a
//! single per-class report.
//!
//! Two entry points are exposed on [`TestRunOrchestrator`]: `run` (submit and
//! optionally wait) and `aggregate_coverage` (check-only). `check_job`
//! re-queries a job submitted earlier.

pub mod config;
pub mod connection;
pub mod coverage;
pub mod diagnostics;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod poller;
pub mod runner;
pub mod testing;

pub use config::Config;
pub use connection::{CallError, CallErrorKind, ConnectionHandle, Operation};
pub use coverage::CoverageAggregator;
pub use diagnostics::StackTraceAnalyzer;
pub use error::{Error, Result};
pub use orchestrator::TestRunOrchestrator;
pub use poller::JobStatusPoller;
pub use runner::{ExecutionStrategy, StrategySelector, Submission};
