use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use serde_json::Value;
use tracing::debug;

use crate::config::CoverageConfig;
use crate::connection::{self, Operation};
use crate::runner::local_name;

use super::merge::{LineCounts, Snapshot};
use crate::models::CoverageSource;

const CLASS_FIELD: &str = "ApexClassOrTrigger.Name";

/// Build the query for `source`, or say why the source is not queried.
pub fn operation_for(
    source: CoverageSource,
    job_id: Option<&str>,
    filter: Option<&[String]>,
    config: &CoverageConfig,
    now: DateTime<Utc>,
) -> Result<Operation, String> {
    let mut conditions = Vec::new();
    let soql = match source {
        CoverageSource::JobSpecific => {
            let job_id = job_id.ok_or("no job to scope coverage to")?;
            conditions.push(format!(
                "ApexTestRunResult.AsyncApexJobId = {}",
                connection::quote(job_id)
            ));
            format!("SELECT {CLASS_FIELD}, NumLinesCovered, NumLinesUncovered, Coverage FROM ApexCodeCoverage")
        }
        CoverageSource::Detailed => {
            if !config.detailed {
                return Err("detailed coverage disabled".into());
            }
            format!(
                "SELECT {CLASS_FIELD}, TestMethodName, NumLinesCovered, NumLinesUncovered, Coverage FROM ApexCodeCoverage"
            )
        }
        CoverageSource::Aggregate => {
            format!("SELECT {CLASS_FIELD}, NumLinesCovered, NumLinesUncovered FROM ApexCodeCoverageAggregate")
        }
        CoverageSource::Recent => {
            let minutes = config
                .recent_window_minutes
                .ok_or("no recent window configured")?;
            let since = now - ChronoDuration::minutes(minutes as i64);
            conditions.push(format!(
                "LastModifiedDate >= {}",
                since.to_rfc3339_opts(SecondsFormat::Secs, true)
            ));
            format!("SELECT {CLASS_FIELD}, NumLinesCovered, NumLinesUncovered, Coverage FROM ApexCodeCoverage")
        }
    };

    if let Some(classes) = filter {
        conditions.push(format!(
            "{CLASS_FIELD} IN {}",
            connection::in_list(classes.iter().map(|c| local_name(c)))
        ));
    }
    let soql = if conditions.is_empty() {
        soql
    } else {
        format!("{} WHERE {}", soql, conditions.join(" AND "))
    };
    Ok(Operation::tooling_query(soql))
}

#[derive(Default)]
struct ClassRows {
    /// Best single row by covered lines.
    best: Option<LineCounts>,
    covered_lines: BTreeSet<i64>,
    uncovered_lines: BTreeSet<i64>,
    /// Whether every row carried line sets.
    all_have_lines: bool,
    rows: usize,
}

/// Collapse one source's rows into a per-class snapshot.
///
/// Method-level sources return one row per (test method, class). Rows for a
/// class are combined by the union of their line sets when every row has
/// them, otherwise the row with the most covered lines stands for the class.
pub fn parse_snapshot(payload: &Value) -> Result<Snapshot, String> {
    let rows = connection::records(payload).ok_or("response has no records array")?;

    let mut classes: BTreeMap<String, ClassRows> = BTreeMap::new();
    for row in rows {
        let Some(name) = row
            .get("ApexClassOrTrigger")
            .and_then(|c| c.get("Name"))
            .and_then(Value::as_str)
        else {
            debug!("skipping coverage row without a class name");
            continue;
        };
        let covered = row.get("NumLinesCovered").and_then(Value::as_i64);
        let uncovered = row.get("NumLinesUncovered").and_then(Value::as_i64);
        let (Some(covered), Some(uncovered)) = (covered, uncovered) else {
            debug!(class = name, "skipping coverage row without line counts");
            continue;
        };

        let Some(total) = covered.checked_add(uncovered) else {
            debug!(class = name, covered, uncovered, "skipping coverage row with out-of-range counts");
            continue;
        };

        let entry = classes.entry(name.to_string()).or_insert_with(|| ClassRows {
            all_have_lines: true,
            ..Default::default()
        });
        entry.rows += 1;

        let counts = LineCounts { covered, total };
        if entry.best.is_none_or(|best| counts.covered > best.covered) {
            entry.best = Some(counts);
        }

        match line_sets(row) {
            Some((covered_lines, uncovered_lines)) => {
                entry.covered_lines.extend(covered_lines);
                entry.uncovered_lines.extend(uncovered_lines);
            }
            None => entry.all_have_lines = false,
        }
    }

    Ok(classes
        .into_iter()
        .filter_map(|(name, rows)| {
            let counts = if rows.rows > 1 && rows.all_have_lines {
                let uncovered = rows.uncovered_lines.difference(&rows.covered_lines).count();
                let covered = rows.covered_lines.len();
                LineCounts {
                    covered: covered as i64,
                    total: (covered + uncovered) as i64,
                }
            } else {
                rows.best?
            };
            Some((name, counts))
        })
        .collect())
}

fn line_sets(row: &Value) -> Option<(Vec<i64>, Vec<i64>)> {
    let coverage = row.get("Coverage")?;
    let lines = |field: &str| -> Option<Vec<i64>> {
        Some(
            coverage
                .get(field)?
                .as_array()?
                .iter()
                .filter_map(Value::as_i64)
                .collect(),
        )
    };
    Some((lines("coveredLines")?, lines("uncoveredLines")?))
}
