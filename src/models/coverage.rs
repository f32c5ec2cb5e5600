use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Error, Result};

/// Where a coverage record came from. Declared in precedence order: a
/// lower variant always wins over a higher one for the same class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum CoverageSource {
    JobSpecific,
    Detailed,
    Aggregate,
    Recent,
}

impl CoverageSource {
    pub const ALL: [CoverageSource; 4] = [
        CoverageSource::JobSpecific,
        CoverageSource::Detailed,
        CoverageSource::Aggregate,
        CoverageSource::Recent,
    ];

    /// Recent coverage is a time-windowed fallback whose staleness cannot be
    /// verified, so records resolved from it are reported as lower confidence.
    pub fn is_low_confidence(&self) -> bool {
        matches!(self, CoverageSource::Recent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum CoverageBand {
    High,
    Medium,
    Low,
}

impl CoverageBand {
    /// Presentation grouping only; never a pass/fail signal.
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= 85.0 {
            CoverageBand::High
        } else if percentage < 75.0 {
            CoverageBand::Low
        } else {
            CoverageBand::Medium
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageRecord {
    class_name: String,
    lines_covered: u64,
    lines_total: u64,
    source: CoverageSource,
}

impl CoverageRecord {
    /// Build a record from raw counts. Negative counts or more covered lines
    /// than total lines are rejected.
    pub fn new(
        class_name: impl Into<String>,
        lines_covered: i64,
        lines_total: i64,
        source: CoverageSource,
    ) -> Result<Self> {
        let class_name = class_name.into();
        if lines_covered < 0 || lines_total < 0 || lines_covered > lines_total {
            return Err(Error::InvalidCoverageRecord {
                class_name,
                lines_covered,
                lines_total,
            });
        }
        Ok(Self {
            class_name,
            lines_covered: lines_covered as u64,
            lines_total: lines_total as u64,
            source,
        })
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn lines_covered(&self) -> u64 {
        self.lines_covered
    }

    pub fn lines_total(&self) -> u64 {
        self.lines_total
    }

    pub fn source(&self) -> CoverageSource {
        self.source
    }

    pub fn percentage(&self) -> f64 {
        percentage(self.lines_covered, self.lines_total)
    }

    pub fn band(&self) -> CoverageBand {
        CoverageBand::from_percentage(self.percentage())
    }
}

pub(crate) fn percentage(covered: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        covered as f64 * 100.0 / total as f64
    }
}

/// Result of fetching one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SourceOutcome {
    Fetched { records: usize },
    Failed { reason: String },
    TimedOut,
    Skipped { reason: String },
}

/// A source row that failed validation and was left out of the merge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRecord {
    pub class_name: String,
    pub source: CoverageSource,
    pub lines_covered: i64,
    pub lines_total: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CoverageTotals {
    pub total_lines: u64,
    pub covered_lines: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoverageReport {
    pub classes: BTreeMap<String, CoverageRecord>,
    pub totals: CoverageTotals,
    pub sources: BTreeMap<CoverageSource, SourceOutcome>,
    pub rejected: Vec<RejectedRecord>,
}

impl CoverageReport {
    pub fn get(&self, class_name: &str) -> Option<&CoverageRecord> {
        self.classes.get(class_name)
    }

    /// Classes whose merged record came from a lower-confidence source.
    pub fn low_confidence_classes(&self) -> Vec<&str> {
        self.classes
            .values()
            .filter(|r| r.source.is_low_confidence())
            .map(CoverageRecord::class_name)
            .collect()
    }

    pub fn by_band(&self) -> BTreeMap<CoverageBand, Vec<&str>> {
        let mut bands: BTreeMap<CoverageBand, Vec<&str>> = BTreeMap::new();
        for record in self.classes.values() {
            bands
                .entry(record.band())
                .or_default()
                .push(record.class_name());
        }
        bands
    }
}
