use serde::Serialize;

use super::status::Outcome;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestMethodResult {
    pub class_name: String,
    pub method_name: String,
    pub outcome: Outcome,
    pub runtime_ms: u64,
    pub diagnostic: Option<FailureDiagnostic>,
}

impl TestMethodResult {
    /// `Class.method`
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.class_name, self.method_name)
    }
}

/// Structured explanation of a failed test method.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FailureDiagnostic {
    pub message: String,
    /// Set when the message was cut at the configured cap.
    pub message_truncated: bool,
    pub stack_trace: String,
    /// Source line of the attributed frame. Absent when no frame could be attributed.
    pub line: Option<u32>,
    pub column: Option<u32>,
    /// `Class.method` of the attributed frame.
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub success_rate: f64,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn from_results(results: &[TestMethodResult]) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.outcome == Outcome::Pass).count();
        let failed = results.iter().filter(|r| r.outcome.is_failure()).count();
        let skipped = results.iter().filter(|r| r.outcome == Outcome::Skip).count();
        let success_rate = if total == 0 {
            0.0
        } else {
            passed as f64 / total as f64
        };
        Self {
            total,
            passed,
            failed,
            skipped,
            success_rate,
            duration_ms: results.iter().map(|r| r.runtime_ms).sum(),
        }
    }
}
