use chrono::{DateTime, Utc};
use serde::Serialize;

use super::request::TestRunRequest;
use super::status::JobStatus;

/// Why one submission strategy did not produce a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyFailure {
    pub strategy: String,
    pub reason: String,
}

/// A requested class the platform refused to enqueue. The job runs without it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedClass {
    pub class_name: String,
    pub reason: String,
}

/// Informational metadata returned when no strategy could execute tests.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisInfo {
    /// Whether the class existence lookup ran at all.
    pub lookup_performed: bool,
    pub classes_found: Vec<String>,
    pub classes_missing: Vec<String>,
    pub strategy_failures: Vec<StrategyFailure>,
}

/// How a job came to exist.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Tests were submitted and are (or were) running remotely.
    Executed { strategy: String },
    /// No execution path was available. Nothing ran.
    AnalysisOnly(AnalysisInfo),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct JobProgress {
    pub processed: u64,
    pub total: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestJob {
    pub id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    /// The request that created the job. Unknown for jobs resumed by id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<TestRunRequest>,
    pub mode: ExecutionMode,
    pub progress: Option<JobProgress>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected_classes: Vec<RejectedClass>,
}

impl TestJob {
    pub fn submitted(id: String, strategy: &str, request: TestRunRequest) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            request: Some(request),
            mode: ExecutionMode::Executed {
                strategy: strategy.to_string(),
            },
            progress: None,
            rejected_classes: Vec::new(),
        }
    }

    pub fn analysis_only(request: TestRunRequest, info: AnalysisInfo) -> Self {
        Self {
            id: String::new(),
            status: JobStatus::NotExecuted,
            created_at: Utc::now(),
            request: Some(request),
            mode: ExecutionMode::AnalysisOnly(info),
            progress: None,
            rejected_classes: Vec::new(),
        }
    }

    /// A handle for a job submitted earlier, known only by its identifier.
    pub fn resumed(id: String) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            request: None,
            mode: ExecutionMode::Executed {
                strategy: "resumed".into(),
            },
            progress: None,
            rejected_classes: Vec::new(),
        }
    }

    /// Classes named by the originating request, if known.
    pub fn class_names(&self) -> &[String] {
        self.request
            .as_ref()
            .map_or(&[], |r| r.class_names.as_slice())
    }

    pub fn is_analysis_only(&self) -> bool {
        matches!(self.mode, ExecutionMode::AnalysisOnly(_))
    }

    /// Record a freshly observed status. Terminal states never change; the
    /// return value says whether the observation was applied.
    pub fn observe(&mut self, status: JobStatus, progress: Option<JobProgress>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        if progress.is_some() {
            self.progress = progress;
        }
        true
    }
}
