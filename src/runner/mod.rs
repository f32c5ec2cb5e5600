pub mod queue;
pub mod tooling;

use std::collections::HashSet;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{ExecutionConfig, StrategyKind};
use crate::connection::{self, CallError, CallErrorKind, ConnectionHandle, Operation};
use crate::error::{Error, Result};
use crate::models::{AnalysisInfo, RejectedClass, Stage, StrategyFailure, TestJob, TestRunRequest};

/// What a strategy reports back after starting a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Submission {
    pub job_id: String,
    /// Requested classes the platform refused. The job runs without them.
    pub rejected_classes: Vec<RejectedClass>,
}

impl Submission {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            rejected_classes: Vec::new(),
        }
    }
}

/// One way of starting an asynchronous test run on the platform.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    /// Display name used in logs and failure reports (e.g., "queue").
    fn name(&self) -> &str;

    /// Submit the request and return the remote job identifier.
    ///
    /// Once remote work has started, failures must be reported as
    /// [`Error::SubmissionUnresolved`] so that no other strategy runs.
    async fn submit(
        &self,
        connection: &dyn ConnectionHandle,
        request: &TestRunRequest,
    ) -> AnyResult<Submission>;
}

/// Tries each strategy in a fixed order and keeps the first job it gets.
pub struct StrategySelector {
    strategies: Vec<Box<dyn ExecutionStrategy>>,
    analysis_fallback: bool,
}

impl StrategySelector {
    pub fn new(strategies: Vec<Box<dyn ExecutionStrategy>>, analysis_fallback: bool) -> Self {
        Self {
            strategies,
            analysis_fallback,
        }
    }

    /// Construct the configured strategies in their configured order.
    pub fn from_config(config: &ExecutionConfig) -> Self {
        let strategies = config
            .strategies
            .iter()
            .map(|kind| -> Box<dyn ExecutionStrategy> {
                match kind {
                    StrategyKind::Queue => Box::new(queue::QueueStrategy),
                    StrategyKind::Tooling => Box::new(tooling::ToolingStrategy),
                }
            })
            .collect();
        Self::new(strategies, config.analysis_fallback)
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn submit(
        &self,
        connection: &dyn ConnectionHandle,
        request: &TestRunRequest,
    ) -> Result<TestJob> {
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            match strategy.submit(connection, request).await {
                Ok(submission) if !submission.job_id.trim().is_empty() => {
                    let id = submission.job_id.trim();
                    info!(strategy = strategy.name(), job_id = %id, "test run submitted");
                    let mut job = TestJob::submitted(id.to_string(), strategy.name(), request.clone());
                    if !submission.rejected_classes.is_empty() {
                        warn!(
                            job_id = %id,
                            rejected = submission.rejected_classes.len(),
                            "some classes were not enqueued"
                        );
                    }
                    job.rejected_classes = submission.rejected_classes;
                    return Ok(job);
                }
                Ok(_) => {
                    warn!(strategy = strategy.name(), "strategy returned an empty job id");
                    failures.push(StrategyFailure {
                        strategy: strategy.name().to_string(),
                        reason: "empty job identifier".into(),
                    });
                }
                Err(e) => {
                    // Remote work already exists; another strategy would start a second run.
                    let e = match e.downcast::<Error>() {
                        Ok(err) => {
                            warn!(strategy = strategy.name(), error = %err, "submission left unresolved");
                            return Err(err);
                        }
                        Err(e) => e,
                    };
                    // An expired session fails every strategy the same way.
                    if let Some(call) = call_error(&e)
                        && call.kind == CallErrorKind::InvalidSession
                    {
                        return Err(Error::from_call(Stage::Submit, call.clone()));
                    }
                    let reason = format!("{:#}", e);
                    warn!(strategy = strategy.name(), error = %reason, "strategy failed");
                    failures.push(StrategyFailure {
                        strategy: strategy.name().to_string(),
                        reason,
                    });
                }
            }
        }

        if !self.analysis_fallback {
            return Err(Error::SubmissionFailed { failures });
        }

        warn!(
            attempted = failures.len(),
            "no execution strategy succeeded, returning analysis-only job"
        );
        let info = analyze(connection, request, failures).await;
        Ok(TestJob::analysis_only(request.clone(), info))
    }
}

fn call_error(err: &anyhow::Error) -> Option<&CallError> {
    err.chain().find_map(|e| e.downcast_ref::<CallError>())
}

/// Strip a `namespace.` prefix.
pub(crate) fn local_name(class_name: &str) -> &str {
    class_name
        .rsplit_once('.')
        .map_or(class_name, |(_, name)| name)
}

/// Best-effort lookup of which requested classes exist in the org.
async fn analyze(
    connection: &dyn ConnectionHandle,
    request: &TestRunRequest,
    strategy_failures: Vec<StrategyFailure>,
) -> AnalysisInfo {
    let mut info = AnalysisInfo {
        strategy_failures,
        ..Default::default()
    };
    if request.class_names.is_empty() {
        return info;
    }

    let soql = format!(
        "SELECT Name FROM ApexClass WHERE Name IN {}",
        connection::in_list(request.class_names.iter().map(|n| local_name(n)))
    );
    let payload = match connection.execute(Operation::query(soql)).await {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "class lookup for analysis failed");
            return info;
        }
    };

    let existing: HashSet<&str> = connection::records(&payload)
        .into_iter()
        .flatten()
        .filter_map(|r| r.get("Name").and_then(|n| n.as_str()))
        .collect();
    info.lookup_performed = true;
    for name in &request.class_names {
        if existing.contains(local_name(name)) {
            info.classes_found.push(name.clone());
        } else {
            info.classes_missing.push(name.clone());
        }
    }
    info
}
