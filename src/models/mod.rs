pub mod coverage;
pub mod job;
pub mod report;
pub mod request;
pub mod result;
pub mod status;

pub use coverage::{
    CoverageBand, CoverageRecord, CoverageReport, CoverageSource, CoverageTotals, RejectedRecord,
    SourceOutcome,
};
pub use job::{AnalysisInfo, ExecutionMode, JobProgress, RejectedClass, StrategyFailure, TestJob};
pub use report::{Stage, StageGap, TestRunReport};
pub use request::{TestLevel, TestRunRequest};
pub use result::{FailureDiagnostic, RunSummary, TestMethodResult};
pub use status::{JobStatus, Outcome};
