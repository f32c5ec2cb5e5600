use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::Instant;

use forcelens::models::{CoverageSource, ExecutionMode, JobStatus, Outcome, Stage, TestRunRequest};
use forcelens::testing::{ScriptedConnection, query_result};
use forcelens::{CallErrorKind, Config, Error, JobStatusPoller, TestRunOrchestrator};

const JOB_ID: &str = "7075g00000AbCdE";

const CLASS_LOOKUP: &str = "FROM ApexClass WHERE";
const QUEUE_PARENT: &str = "FROM ApexTestQueueItem";
const QUEUE_INSERT: &str = "ApexTestQueueItem";
const STATUS: &str = "FROM AsyncApexJob WHERE";
const RESULTS: &str = "FROM ApexTestResult";
const JOB_COVERAGE: &str = "ApexTestRunResult.AsyncApexJobId";
const AGGREGATE_COVERAGE: &str = "FROM ApexCodeCoverageAggregate";
const DETAILED_COVERAGE: &str = "TestMethodName";

fn status(value: &str) -> Value {
    query_result(vec![json!({
        "Id": JOB_ID,
        "Status": value,
        "JobItemsProcessed": 1,
        "TotalJobItems": 1,
        "NumberOfErrors": 0,
    })])
}

fn coverage_rows(entries: &[(&str, i64, i64)]) -> Value {
    query_result(
        entries
            .iter()
            .map(|&(name, covered, uncovered)| {
                json!({
                    "ApexClassOrTrigger": { "Name": name },
                    "NumLinesCovered": covered,
                    "NumLinesUncovered": uncovered,
                })
            })
            .collect(),
    )
}

fn failing_results() -> Value {
    query_result(vec![
        json!({
            "ApexClass": { "Name": "ContactManagerTest" },
            "MethodName": "makeData",
            "Outcome": "Fail",
            "RunTime": 48,
            "Message": "System.DmlException: Insert failed. REQUIRED_FIELD_MISSING",
            "StackTrace": "Class.ContactManagerTest.makeData: line 17, column 1",
        }),
        json!({
            "ApexClass": { "Name": "ContactManagerTest" },
            "MethodName": "updatesContacts",
            "Outcome": "Fail",
            "RunTime": 12,
            "Message": "System.NullPointerException: Attempt to de-reference a null object",
            "StackTrace": "External entry point",
        }),
    ])
}

/// A connection on which the queue strategy submits successfully.
fn submitting_connection() -> ScriptedConnection {
    ScriptedConnection::new()
        .on_ok(
            CLASS_LOOKUP,
            query_result(vec![json!({ "Id": "01p5g000000XyZa", "Name": "ContactManagerTest" })]),
        )
        .on_ok(
            QUEUE_PARENT,
            query_result(vec![json!({ "ParentJobId": JOB_ID })]),
        )
        .on_ok(QUEUE_INSERT, json!([{ "id": "7095g000001", "success": true }]))
}

fn request() -> TestRunRequest {
    TestRunRequest::specified(["ContactManagerTest"])
}

#[tokio::test]
async fn run_with_two_failing_methods() {
    let conn = submitting_connection()
        .on_ok(STATUS, status("Completed"))
        .on_ok(RESULTS, failing_results())
        .on_ok(JOB_COVERAGE, coverage_rows(&[("ContactManager", 12, 8)]))
        .on_ok(
            AGGREGATE_COVERAGE,
            coverage_rows(&[("ContactManager", 20, 0), ("AccountService", 9, 1)]),
        )
        .on_ok(DETAILED_COVERAGE, coverage_rows(&[]));

    let report = TestRunOrchestrator::new(&Config::default())
        .run(&conn, &request(), None)
        .await
        .unwrap();

    assert_eq!(report.job.id, JOB_ID);
    assert_eq!(report.job.status, JobStatus::Completed);
    assert!(!report.is_analysis_only());
    assert_eq!(report.summary.total, 2);
    assert_eq!(report.summary.passed, 0);
    assert_eq!(report.summary.failed, 2);
    assert_eq!(report.summary.success_rate, 0.0);
    assert!(report.gaps.is_empty());

    let first = &report.results[0];
    assert_eq!(first.outcome, Outcome::Fail);
    let diagnostic = first.diagnostic.as_ref().unwrap();
    assert_eq!(diagnostic.line, Some(17));
    assert_eq!(diagnostic.location.as_deref(), Some("ContactManagerTest.makeData"));

    let second = report.results[1].diagnostic.as_ref().unwrap();
    assert_eq!(second.line, None);
    assert!(second.message.contains("NullPointerException"));

    let coverage = report.coverage.as_ref().unwrap();
    let merged = coverage.get("ContactManager").unwrap();
    assert_eq!(merged.source(), CoverageSource::JobSpecific);
    assert_eq!(merged.lines_covered(), 12);
    assert_eq!(coverage.totals.total_lines, 30);
    assert_eq!(coverage.totals.covered_lines, 21);
}

#[tokio::test]
async fn falls_back_to_tooling_when_queue_is_denied() {
    let conn = ScriptedConnection::new()
        .on_err(CLASS_LOOKUP, CallErrorKind::Permission, "INSUFFICIENT_ACCESS")
        .on_ok("runTestsAsynchronous", json!(JOB_ID));
    let request = request().wait_for_completion(false);

    let report = TestRunOrchestrator::new(&Config::default())
        .run(&conn, &request, None)
        .await
        .unwrap();

    assert_eq!(report.job.id, JOB_ID);
    assert_eq!(
        report.job.mode,
        ExecutionMode::Executed {
            strategy: "tooling".into()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn queued_run_with_lost_parent_is_not_submitted_twice() {
    let conn = ScriptedConnection::new()
        .on_ok(
            CLASS_LOOKUP,
            query_result(vec![json!({ "Id": "01p5g000000XyZa", "Name": "ContactManagerTest" })]),
        )
        .on_err(QUEUE_PARENT, CallErrorKind::Transient, "connection reset")
        .on_ok(QUEUE_INSERT, json!([{ "id": "709QUEUED", "success": true }]))
        .on_ok("runTestsAsynchronous", json!("707TOOLING"));

    let err = TestRunOrchestrator::new(&Config::default())
        .run(&conn, &request(), None)
        .await
        .unwrap_err();

    match err {
        Error::SubmissionUnresolved { strategy, item_ids, .. } => {
            assert_eq!(strategy, "queue");
            assert_eq!(item_ids, vec!["709QUEUED"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(conn.call_count("runTestsAsynchronous"), 0);
    assert_eq!(conn.call_count(STATUS), 0);
}

#[tokio::test]
async fn partially_enqueued_run_reports_rejected_classes() {
    let conn = ScriptedConnection::new()
        .on_ok(
            CLASS_LOOKUP,
            query_result(vec![
                json!({ "Id": "01p5g000000XyZa", "Name": "ContactManagerTest" }),
                json!({ "Id": "01p5g000000XyZb", "Name": "AccountTest" }),
            ]),
        )
        .on_ok(QUEUE_PARENT, query_result(vec![json!({ "ParentJobId": JOB_ID })]))
        .on_ok(
            QUEUE_INSERT,
            json!([
                { "id": "709a", "success": true },
                { "success": false, "errors": [{ "message": "ALREADY_IN_PROCESS" }] }
            ]),
        );
    let request =
        TestRunRequest::specified(["ContactManagerTest", "AccountTest"]).wait_for_completion(false);

    let report = TestRunOrchestrator::new(&Config::default())
        .run(&conn, &request, None)
        .await
        .unwrap();

    assert_eq!(report.job.id, JOB_ID);
    assert_eq!(report.job.rejected_classes.len(), 1);
    assert_eq!(report.job.rejected_classes[0].class_name, "AccountTest");
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["job"]["rejected_classes"][0]["reason"], "ALREADY_IN_PROCESS");
}

#[tokio::test]
async fn no_wait_returns_queued_job_without_polling() {
    let conn = submitting_connection();
    let request = request().wait_for_completion(false);

    let report = TestRunOrchestrator::new(&Config::default())
        .run(&conn, &request, None)
        .await
        .unwrap();

    assert_eq!(report.job.status, JobStatus::Queued);
    assert!(!report.job.id.is_empty());
    assert_eq!(conn.call_count(STATUS), 0);
    assert!(report.results.is_empty());
}

#[tokio::test]
async fn all_strategies_failing_yields_analysis_only_report() {
    let conn = ScriptedConnection::new()
        .on_ok(CLASS_LOOKUP, query_result(vec![]))
        .on_err("runTestsAsynchronous", CallErrorKind::Unavailable, "API_DISABLED_FOR_ORG");

    let report = TestRunOrchestrator::new(&Config::default())
        .run(&conn, &request(), None)
        .await
        .unwrap();

    assert!(report.is_analysis_only());
    assert_eq!(report.job.status, JobStatus::NotExecuted);
    assert!(report.results.is_empty());
    assert_eq!(report.summary.total, 0);
    assert_eq!(report.summary.failed, 0);
    let ExecutionMode::AnalysisOnly(info) = &report.job.mode else {
        panic!("expected analysis mode");
    };
    assert_eq!(info.strategy_failures.len(), 2);
    assert_eq!(info.classes_missing, vec!["ContactManagerTest"]);
    assert_eq!(conn.call_count(STATUS), 0);
}

#[tokio::test]
async fn all_strategies_failing_without_fallback_is_an_error() {
    let mut config = Config::default();
    config.execution.analysis_fallback = false;
    let conn = ScriptedConnection::new().on_ok(CLASS_LOOKUP, query_result(vec![]));

    let err = TestRunOrchestrator::new(&config)
        .run(&conn, &request(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SubmissionFailed { ref failures } if failures.len() == 2));
}

#[tokio::test(start_paused = true)]
async fn timeout_keeps_job_and_can_be_resumed() {
    let conn = submitting_connection().on_ok(STATUS, status("Processing"));
    let orchestrator = TestRunOrchestrator::new(&Config::default()).with_poller(
        JobStatusPoller::new(&Config::default().polling)
            .with_limits(Duration::from_secs(10), Duration::from_secs(2)),
    );

    let err = orchestrator.run(&conn, &request(), None).await.unwrap_err();
    let Error::PartialResult { report, stage, cause } = err else {
        panic!("expected partial result");
    };
    assert_eq!(stage, Stage::Wait);
    assert!(matches!(*cause, Error::JobTimedOut { .. }));
    assert!(cause.is_retryable());
    assert_eq!(report.job.id, JOB_ID);
    assert_eq!(report.job.status, JobStatus::Processing);
    assert_eq!(report.gaps[0].stage, Stage::Wait);

    let later = ScriptedConnection::new()
        .on_ok(STATUS, status("Completed"))
        .on_ok(RESULTS, failing_results());
    let resumed = orchestrator.check_job(&later, &report.job.id, false).await.unwrap();
    assert_eq!(resumed.job.status, JobStatus::Completed);
    assert_eq!(resumed.summary.failed, 2);
    assert!(resumed.coverage.is_none());
}

#[tokio::test]
async fn passed_deadline_returns_last_known_job() {
    let conn = submitting_connection().on_ok(STATUS, status("Processing"));

    let err = TestRunOrchestrator::new(&Config::default())
        .run(&conn, &request(), Some(Instant::now()))
        .await
        .unwrap_err();

    assert_eq!(err.job_id(), Some(JOB_ID));
    let report = err.partial_report().unwrap();
    assert_eq!(report.job.status, JobStatus::Queued);
    assert_eq!(conn.call_count(STATUS), 0);
}

#[tokio::test]
async fn coverage_failure_keeps_results() {
    let conn = submitting_connection()
        .on_ok(STATUS, status("Completed"))
        .on_ok(RESULTS, failing_results())
        .on_err(JOB_COVERAGE, CallErrorKind::Permission, "denied")
        .on_err(AGGREGATE_COVERAGE, CallErrorKind::Permission, "denied")
        .on_err(DETAILED_COVERAGE, CallErrorKind::Permission, "denied");

    let err = TestRunOrchestrator::new(&Config::default())
        .run(&conn, &request(), None)
        .await
        .unwrap_err();

    let Error::PartialResult { report, stage, .. } = err else {
        panic!("expected partial result");
    };
    assert_eq!(stage, Stage::Coverage);
    assert_eq!(report.summary.total, 2);
    assert!(report.coverage.is_none());
    assert_eq!(report.gaps.len(), 1);
}

#[tokio::test]
async fn expired_session_is_retryable() {
    let conn = ScriptedConnection::new().on_err(
        CLASS_LOOKUP,
        CallErrorKind::InvalidSession,
        "INVALID_SESSION_ID",
    );

    let err = TestRunOrchestrator::new(&Config::default())
        .run(&conn, &request(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConnectionInvalid { stage: Stage::Submit, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn org_wide_coverage_check() {
    let conn = ScriptedConnection::new()
        .on_ok(
            AGGREGATE_COVERAGE,
            coverage_rows(&[("ContactManager", 19, 1), ("AccountService", 7, 3)]),
        )
        .on_ok(DETAILED_COVERAGE, coverage_rows(&[("AccountService", 8, 2)]));

    let coverage = TestRunOrchestrator::new(&Config::default())
        .aggregate_coverage(&conn, None, None)
        .await
        .unwrap();

    assert_eq!(coverage.classes.len(), 2);
    assert_eq!(coverage.get("AccountService").unwrap().lines_covered(), 8);
    assert_eq!(coverage.totals.covered_lines, 27);
    assert_eq!(conn.call_count(JOB_COVERAGE), 0);
}

#[tokio::test]
async fn report_serializes_for_callers() {
    let conn = submitting_connection();
    let report = TestRunOrchestrator::new(&Config::default())
        .run(&conn, &request().wait_for_completion(false), None)
        .await
        .unwrap();

    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["job"]["id"], JOB_ID);
    assert_eq!(value["job"]["mode"]["mode"], "executed");
    assert_eq!(value["job"]["status"], "Queued");
}
