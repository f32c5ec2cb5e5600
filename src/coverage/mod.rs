//! Coverage fusion across the platform's coverage sources.
//!
//! Sources are queried concurrently. Each one gets its own time budget and a
//! source that fails or runs out of time simply contributes no records.
//! Merging is a pure function over the collected snapshots (see [`merge`]).

pub mod merge;
pub mod sources;

use std::collections::BTreeMap;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::time::{Instant, timeout_at};
use tracing::{info, warn};

use crate::config::CoverageConfig;
use crate::connection::{CallErrorKind, ConnectionHandle};
use crate::error::{Error, Result};
use crate::models::{CoverageReport, CoverageSource, SourceOutcome, Stage};

pub use merge::{LineCounts, Snapshot};

pub struct CoverageAggregator {
    config: CoverageConfig,
}

enum Fetched {
    Snapshot(Snapshot),
    Skipped(String),
    Failed { reason: String, session_expired: bool },
    TimedOut,
}

impl CoverageAggregator {
    pub fn new(config: &CoverageConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Build a coverage report.
    ///
    /// `job_id` enables the job-specific source. `filter` restricts the
    /// output to the named classes; without it every reported class appears.
    /// A passed `deadline` cuts every pending source short.
    pub async fn aggregate(
        &self,
        connection: &dyn ConnectionHandle,
        job_id: Option<&str>,
        filter: Option<&[String]>,
        deadline: Option<Instant>,
    ) -> Result<CoverageReport> {
        let now = Utc::now();
        let mut budget_end = Instant::now() + self.config.source_timeout();
        if let Some(d) = deadline {
            budget_end = budget_end.min(d);
        }

        let fetches = CoverageSource::ALL.into_iter().map(move |source| async move {
            let operation = match sources::operation_for(source, job_id, filter, &self.config, now)
            {
                Ok(op) => op,
                Err(reason) => return (source, Fetched::Skipped(reason)),
            };
            let fetched = match timeout_at(budget_end, connection.execute(operation)).await {
                Err(_) => Fetched::TimedOut,
                Ok(Err(e)) => Fetched::Failed {
                    session_expired: e.kind == CallErrorKind::InvalidSession,
                    reason: e.to_string(),
                },
                Ok(Ok(payload)) => match sources::parse_snapshot(&payload) {
                    Ok(snapshot) => Fetched::Snapshot(snapshot),
                    Err(reason) => Fetched::Failed {
                        reason,
                        session_expired: false,
                    },
                },
            };
            (source, fetched)
        });

        let mut snapshots = BTreeMap::new();
        let mut outcomes = BTreeMap::new();
        let mut failures = Vec::new();
        let mut session_expired = None;

        for (source, fetched) in join_all(fetches).await {
            let outcome = match fetched {
                Fetched::Snapshot(snapshot) => {
                    let records = snapshot.len();
                    snapshots.insert(source, snapshot);
                    SourceOutcome::Fetched { records }
                }
                Fetched::Skipped(reason) => SourceOutcome::Skipped { reason },
                Fetched::Failed {
                    reason,
                    session_expired: expired,
                } => {
                    warn!(?source, error = %reason, "coverage source failed");
                    if expired {
                        session_expired = Some(reason.clone());
                    }
                    failures.push((source, reason.clone()));
                    SourceOutcome::Failed { reason }
                }
                Fetched::TimedOut => {
                    warn!(?source, "coverage source timed out");
                    failures.push((source, "timed out".to_string()));
                    SourceOutcome::TimedOut
                }
            };
            outcomes.insert(source, outcome);
        }

        if snapshots.is_empty() && !failures.is_empty() {
            return Err(match session_expired {
                Some(message) => Error::ConnectionInvalid {
                    stage: Stage::Coverage,
                    message,
                },
                None => Error::CoverageUnavailable { failures },
            });
        }

        let mut report = merge::merge(&snapshots, filter);
        report.sources = outcomes;
        info!(
            classes = report.classes.len(),
            percentage = report.totals.percentage,
            "coverage aggregated"
        );
        Ok(report)
    }
}
