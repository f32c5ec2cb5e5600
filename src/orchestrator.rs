use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::Config;
use crate::connection::{self, ConnectionHandle, Operation};
use crate::coverage::CoverageAggregator;
use crate::diagnostics::StackTraceAnalyzer;
use crate::error::{Error, Result};
use crate::models::{
    CoverageReport, JobStatus, Outcome, Stage, StageGap, TestJob, TestMethodResult, TestRunReport,
    TestRunRequest,
};
use crate::poller::JobStatusPoller;
use crate::runner::StrategySelector;

/// Drives one request through submission, waiting, result collection and
/// coverage. Holds no per-run state, so one instance can serve concurrent runs.
pub struct TestRunOrchestrator {
    selector: StrategySelector,
    poller: JobStatusPoller,
    analyzer: StackTraceAnalyzer,
    coverage: CoverageAggregator,
}

impl TestRunOrchestrator {
    pub fn new(config: &Config) -> Self {
        Self {
            selector: StrategySelector::from_config(&config.execution),
            poller: JobStatusPoller::new(&config.polling),
            analyzer: StackTraceAnalyzer::new(&config.diagnostics),
            coverage: CoverageAggregator::new(&config.coverage),
        }
    }

    pub fn with_selector(mut self, selector: StrategySelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_poller(mut self, poller: JobStatusPoller) -> Self {
        self.poller = poller;
        self
    }

    /// Submit, optionally wait, then collect results and coverage.
    ///
    /// Once a job exists, any later failure is returned as
    /// [`Error::PartialResult`] carrying everything gathered so far.
    pub async fn run(
        &self,
        connection: &dyn ConnectionHandle,
        request: &TestRunRequest,
        deadline: Option<Instant>,
    ) -> Result<TestRunReport> {
        request.validate()?;

        let job = self.selector.submit(connection, request).await?;
        let mut report = TestRunReport::new(job);
        if report.is_analysis_only() || !request.wait_for_completion {
            return Ok(report);
        }

        if let Err(e) = self
            .poller
            .wait_for_completion(connection, &mut report.job, deadline)
            .await
        {
            return Err(partial(report, Stage::Wait, e));
        }

        self.collect(connection, report, request.collect_coverage, deadline)
            .await
    }

    /// Re-check a job submitted earlier. Results and coverage are collected
    /// only once it has completed.
    pub async fn check_job(
        &self,
        connection: &dyn ConnectionHandle,
        job_id: &str,
        collect_coverage: bool,
    ) -> Result<TestRunReport> {
        let mut job = TestJob::resumed(job_id.to_string());
        let (status, progress) = self.poller.poll_once(connection, job_id).await?;
        job.observe(status, progress);
        self.collect(connection, TestRunReport::new(job), collect_coverage, None)
            .await
    }

    /// Coverage without running anything. Without a filter every class the
    /// sources report is included.
    pub async fn aggregate_coverage(
        &self,
        connection: &dyn ConnectionHandle,
        filter: Option<&[String]>,
        deadline: Option<Instant>,
    ) -> Result<CoverageReport> {
        self.coverage
            .aggregate(connection, None, filter, deadline)
            .await
    }

    async fn collect(
        &self,
        connection: &dyn ConnectionHandle,
        mut report: TestRunReport,
        collect_coverage: bool,
        deadline: Option<Instant>,
    ) -> Result<TestRunReport> {
        match report.job.status {
            JobStatus::Completed => {}
            status if status.is_terminal() => {
                warn!(job_id = %report.job.id, %status, "job ended without completing");
                report.gaps.push(StageGap {
                    stage: Stage::Results,
                    reason: format!("job ended {}", status),
                });
                return Ok(report);
            }
            _ => return Ok(report),
        }

        let fetched = self
            .fetch_results(connection, &report.job.id, report.job.class_names())
            .await;
        report = match fetched {
            Ok(results) => report.with_results(results),
            Err(e) => return Err(partial(report, Stage::Results, e)),
        };

        if collect_coverage {
            let coverage = self
                .coverage
                .aggregate(connection, Some(&report.job.id), None, deadline)
                .await;
            match coverage {
                Ok(coverage) => report.coverage = Some(coverage),
                Err(e) => return Err(partial(report, Stage::Coverage, e)),
            }
        }

        info!(
            job_id = %report.job.id,
            total = report.summary.total,
            passed = report.summary.passed,
            failed = report.summary.failed,
            "test run collected"
        );
        Ok(report)
    }

    async fn fetch_results(
        &self,
        connection: &dyn ConnectionHandle,
        job_id: &str,
        run_classes: &[String],
    ) -> Result<Vec<TestMethodResult>> {
        let soql = format!(
            "SELECT ApexClass.Name, MethodName, Outcome, RunTime, Message, StackTrace \
             FROM ApexTestResult WHERE AsyncApexJobId = {} ORDER BY ApexClass.Name, MethodName",
            connection::quote(job_id)
        );
        let payload = connection
            .execute(Operation::query(soql))
            .await
            .map_err(|e| Error::from_call(Stage::Results, e))?;

        let rows = connection::records(&payload).ok_or_else(|| Error::MalformedResponse {
            stage: Stage::Results,
            message: "test result response has no records".into(),
        })?;
        rows.iter()
            .map(|row| self.parse_result(row, run_classes))
            .collect()
    }

    /// `run_classes` steers line attribution. A job resumed by id has none,
    /// so the result's own class stands in.
    fn parse_result(&self, row: &Value, run_classes: &[String]) -> Result<TestMethodResult> {
        let text = |field: &str| row.get(field).and_then(Value::as_str);
        let malformed = |message: String| Error::MalformedResponse {
            stage: Stage::Results,
            message,
        };

        let class_name = row
            .get("ApexClass")
            .and_then(|c| c.get("Name"))
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("test result without class name".into()))?;
        let method_name = text("MethodName")
            .ok_or_else(|| malformed(format!("test result in {} without method name", class_name)))?;
        let outcome: Outcome = text("Outcome")
            .unwrap_or_default()
            .parse()
            .map_err(malformed)?;

        let own_class = [class_name.to_string()];
        let run_classes = if run_classes.is_empty() {
            &own_class[..]
        } else {
            run_classes
        };
        let diagnostic = outcome.is_failure().then(|| {
            self.analyzer.analyze_in(
                text("StackTrace").unwrap_or_default(),
                text("Message").unwrap_or_default(),
                run_classes,
            )
        });

        Ok(TestMethodResult {
            class_name: class_name.to_string(),
            method_name: method_name.to_string(),
            outcome,
            runtime_ms: row.get("RunTime").and_then(Value::as_u64).unwrap_or(0),
            diagnostic,
        })
    }
}

fn partial(mut report: TestRunReport, stage: Stage, cause: Error) -> Error {
    warn!(job_id = %report.job.id, %stage, error = %cause, "returning partial result");
    report.gaps.push(StageGap {
        stage,
        reason: cause.to_string(),
    });
    Error::PartialResult {
        report: Box::new(report),
        stage,
        cause: Box::new(cause),
    }
}
