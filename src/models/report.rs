use std::fmt;

use serde::Serialize;

use super::coverage::CoverageReport;
use super::job::TestJob;
use super::result::{RunSummary, TestMethodResult};

/// Pipeline stage, used to say where a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Submit,
    Wait,
    Results,
    Coverage,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Submit => "submit",
            Stage::Wait => "wait",
            Stage::Results => "results",
            Stage::Coverage => "coverage",
        };
        f.write_str(name)
    }
}

/// Marks a stage whose output is missing from a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageGap {
    pub stage: Stage,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestRunReport {
    pub job: TestJob,
    pub results: Vec<TestMethodResult>,
    pub coverage: Option<CoverageReport>,
    pub summary: RunSummary,
    pub gaps: Vec<StageGap>,
}

impl TestRunReport {
    pub fn new(job: TestJob) -> Self {
        Self {
            job,
            results: Vec::new(),
            coverage: None,
            summary: RunSummary::default(),
            gaps: Vec::new(),
        }
    }

    pub fn is_analysis_only(&self) -> bool {
        self.job.is_analysis_only()
    }

    pub fn with_results(mut self, results: Vec<TestMethodResult>) -> Self {
        self.summary = RunSummary::from_results(&results);
        self.results = results;
        self
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestMethodResult> {
        self.results.iter().filter(|r| r.outcome.is_failure())
    }
}
