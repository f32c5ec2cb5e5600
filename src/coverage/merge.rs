use std::collections::{BTreeMap, HashSet};

use tracing::warn;

use crate::models::coverage::percentage;
use crate::models::{CoverageRecord, CoverageReport, CoverageSource, CoverageTotals, RejectedRecord};
use crate::runner::local_name;

/// Raw line counts for one class as reported by one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCounts {
    pub covered: i64,
    pub total: i64,
}

/// One source's view, keyed by class name.
pub type Snapshot = BTreeMap<String, LineCounts>;

/// Merge per-source snapshots into one record per class.
///
/// For each class the highest-precedence source with a valid record wins
/// outright. Invalid records are rejected and the next source gets its turn.
/// Totals are computed from the merged map only.
pub fn merge(
    snapshots: &BTreeMap<CoverageSource, Snapshot>,
    filter: Option<&[String]>,
) -> CoverageReport {
    let wanted: Option<HashSet<&str>> =
        filter.map(|classes| classes.iter().map(|c| local_name(c)).collect());

    let mut report = CoverageReport::default();
    // BTreeMap iterates sources in precedence order.
    for (&source, snapshot) in snapshots {
        for (class_name, counts) in snapshot {
            if report.classes.contains_key(class_name) {
                continue;
            }
            if let Some(wanted) = &wanted
                && !wanted.contains(class_name.as_str())
            {
                continue;
            }
            match CoverageRecord::new(class_name.clone(), counts.covered, counts.total, source) {
                Ok(record) => {
                    report.classes.insert(class_name.clone(), record);
                }
                Err(e) => {
                    warn!(?source, error = %e, "rejecting coverage record");
                    report.rejected.push(RejectedRecord {
                        class_name: class_name.clone(),
                        source,
                        lines_covered: counts.covered,
                        lines_total: counts.total,
                    });
                }
            }
        }
    }

    report.totals = totals(&report.classes);
    report
}

fn totals(classes: &BTreeMap<String, CoverageRecord>) -> CoverageTotals {
    let total_lines = classes.values().map(CoverageRecord::lines_total).sum();
    let covered_lines = classes.values().map(CoverageRecord::lines_covered).sum();
    CoverageTotals {
        total_lines,
        covered_lines,
        percentage: percentage(covered_lines, total_lines),
    }
}
