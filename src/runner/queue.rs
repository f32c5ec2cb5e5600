use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::warn;

use crate::connection::{self, CallErrorKind, ConnectionHandle, Operation};
use crate::error::Error;
use crate::models::{RejectedClass, TestLevel, TestRunRequest};

use super::{ExecutionStrategy, Submission, local_name};

const STRATEGY: &str = "queue";
const PARENT_LOOKUP_ATTEMPTS: u32 = 3;
const PARENT_LOOKUP_DELAY: Duration = Duration::from_millis(250);

/// Direct submission through the test queue: one queue item per class,
/// inserted together so they share a parent job.
///
/// The insert itself starts the run. From that point on every failure is
/// reported as [`Error::SubmissionUnresolved`] with the inserted item ids.
pub struct QueueStrategy;

#[async_trait]
impl ExecutionStrategy for QueueStrategy {
    fn name(&self) -> &str {
        STRATEGY
    }

    async fn submit(
        &self,
        connection: &dyn ConnectionHandle,
        request: &TestRunRequest,
    ) -> Result<Submission> {
        if request.level != TestLevel::RunSpecifiedTests {
            bail!("queue submission does not support {}", request.level.as_str());
        }

        let class_ids = lookup_class_ids(connection, &request.class_names).await?;
        let (names, items): (Vec<&str>, Vec<Value>) = request
            .class_names
            .iter()
            .filter_map(|name| {
                let id = class_ids.get(local_name(name))?;
                Some((name.as_str(), json!({ "ApexClassId": id })))
            })
            .unzip();

        let inserted = connection
            .execute(Operation::Create {
                sobject: "ApexTestQueueItem".into(),
                records: items,
            })
            .await
            .context("failed to enqueue test classes")?;

        let (item_ids, rejected_classes) = split_insert_results(&names, &inserted);
        if item_ids.is_empty() {
            let reasons: Vec<String> = rejected_classes
                .iter()
                .map(|r| format!("{}: {}", r.class_name, r.reason))
                .collect();
            bail!("queue rejected every class: {}", reasons.join("; "));
        }

        let job_id = resolve_parent_job(connection, &item_ids[0])
            .await
            .map_err(|e| Error::SubmissionUnresolved {
                strategy: STRATEGY.into(),
                item_ids: item_ids.clone(),
                message: format!("{:#}", e),
            })?;
        Ok(Submission {
            job_id,
            rejected_classes,
        })
    }
}

/// Pair insert results with the classes they were created for. Rows are
/// returned in request order; a missing row counts as a rejection.
fn split_insert_results(names: &[&str], inserted: &Value) -> (Vec<String>, Vec<RejectedClass>) {
    let rows = inserted.as_array().map(Vec::as_slice).unwrap_or_default();
    let mut item_ids = Vec::new();
    let mut rejected = Vec::new();

    for (i, name) in names.iter().enumerate() {
        let row = rows.get(i);
        let accepted = row
            .filter(|r| r.get("success").and_then(Value::as_bool) != Some(false))
            .and_then(|r| r.get("id"))
            .and_then(Value::as_str);
        match accepted {
            Some(id) => item_ids.push(id.to_string()),
            None => rejected.push(RejectedClass {
                class_name: name.to_string(),
                reason: row.map_or_else(|| "no insert result".to_string(), insert_error),
            }),
        }
    }
    (item_ids, rejected)
}

fn insert_error(row: &Value) -> String {
    let messages: Vec<&str> = row
        .get("errors")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|e| e.get("message").and_then(Value::as_str))
        .collect();
    if messages.is_empty() {
        "insert failed".to_string()
    } else {
        messages.join("; ")
    }
}

/// Read the parent job of an inserted queue item, retrying transient failures.
async fn resolve_parent_job(connection: &dyn ConnectionHandle, item_id: &str) -> Result<String> {
    let soql = format!(
        "SELECT ParentJobId FROM ApexTestQueueItem WHERE Id = {}",
        connection::quote(item_id)
    );

    let mut attempt = 1;
    let payload = loop {
        match connection.execute(Operation::query(soql.clone())).await {
            Ok(payload) => break payload,
            Err(e) if e.kind == CallErrorKind::Transient && attempt < PARENT_LOOKUP_ATTEMPTS => {
                warn!(item_id, attempt, error = %e, "parent job lookup failed, retrying");
                sleep(PARENT_LOOKUP_DELAY * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e).context("failed to read parent job of queue item"),
        }
    };

    let job_id = connection::records(&payload)
        .and_then(|rows| rows.first())
        .and_then(|row| row.get("ParentJobId"))
        .and_then(Value::as_str)
        .context("queue item has no parent job")?;
    Ok(job_id.to_string())
}

/// Map local class names to record ids. Fails if any class is unknown.
async fn lookup_class_ids(
    connection: &dyn ConnectionHandle,
    class_names: &[String],
) -> Result<HashMap<String, String>> {
    let soql = format!(
        "SELECT Id, Name FROM ApexClass WHERE Name IN {}",
        connection::in_list(class_names.iter().map(|n| local_name(n)))
    );
    let payload = connection
        .execute(Operation::query(soql))
        .await
        .context("failed to look up test classes")?;

    let ids: HashMap<String, String> = connection::records(&payload)
        .into_iter()
        .flatten()
        .filter_map(|row| {
            let name = row.get("Name")?.as_str()?;
            let id = row.get("Id")?.as_str()?;
            Some((name.to_string(), id.to_string()))
        })
        .collect();

    let missing: Vec<&str> = class_names
        .iter()
        .map(|n| local_name(n))
        .filter(|n| !ids.contains_key(*n))
        .collect();
    if !missing.is_empty() {
        bail!("test classes not found: {}", missing.join(", "));
    }
    Ok(ids)
}
