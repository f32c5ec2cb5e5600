//! Polls an asynchronous job until it finishes, the wait budget runs out,
//! or the caller's deadline passes.
//!
//! Each iteration is driven by [`next_state`], a pure function of the last
//! observed status and the clock, so the loop can be tested by feeding it
//! synthetic status sequences.

use std::time::Duration;

use serde_json::Value;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::config::PollingConfig;
use crate::connection::{self, CallErrorKind, ConnectionHandle, Operation};
use crate::error::{Error, Result};
use crate::models::{JobProgress, JobStatus, Stage, TestJob};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poller-local view of a wait. `TimedOut` and `DeadlineExceeded` describe
/// the wait, not the job: the job itself keeps its last observed status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Waiting,
    Done,
    TimedOut,
    DeadlineExceeded,
}

pub fn next_state(
    status: JobStatus,
    elapsed: Duration,
    max_wait: Duration,
    deadline_passed: bool,
) -> PollState {
    if status.is_terminal() {
        PollState::Done
    } else if deadline_passed {
        PollState::DeadlineExceeded
    } else if elapsed >= max_wait {
        PollState::TimedOut
    } else {
        PollState::Waiting
    }
}

pub struct JobStatusPoller {
    max_wait: Duration,
    poll_interval: Duration,
    max_retries: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl JobStatusPoller {
    pub fn new(config: &PollingConfig) -> Self {
        Self {
            max_wait: config.max_wait(),
            poll_interval: config.poll_interval(),
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_cap: Duration::from_millis(config.backoff_cap_ms),
        }
    }

    pub fn with_limits(mut self, max_wait: Duration, poll_interval: Duration) -> Self {
        self.max_wait = max_wait;
        self.poll_interval = poll_interval;
        self
    }

    /// Delay before retry number `attempt` (zero based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_cap)
    }

    /// Wait for `job` to reach a terminal state, updating it in place.
    ///
    /// On timeout or deadline the error carries a copy of the last observed
    /// job. The job keeps running remotely and can be checked again later.
    pub async fn wait_for_completion(
        &self,
        connection: &dyn ConnectionHandle,
        job: &mut TestJob,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let started = Instant::now();
        let interval = self.poll_interval.max(MIN_POLL_INTERVAL);

        loop {
            let deadline_passed = deadline.is_some_and(|d| Instant::now() >= d);
            match next_state(job.status, started.elapsed(), self.max_wait, deadline_passed) {
                PollState::Done => return Ok(()),
                PollState::TimedOut => {
                    return Err(Error::JobTimedOut {
                        job: Box::new(job.clone()),
                        waited: started.elapsed(),
                    });
                }
                PollState::DeadlineExceeded => {
                    return Err(Error::DeadlineExceeded {
                        job: Box::new(job.clone()),
                    });
                }
                PollState::Waiting => {}
            }

            let (status, progress) = self.poll_once(connection, &job.id).await?;
            if job.observe(status, progress) {
                debug!(job_id = %job.id, status = %job.status, "job status observed");
            }
            if job.status.is_terminal() {
                return Ok(());
            }

            let mut nap = interval.min(self.max_wait.saturating_sub(started.elapsed()));
            if let Some(d) = deadline {
                nap = nap.min(d.saturating_duration_since(Instant::now()));
            }
            sleep(nap).await;
        }
    }

    /// One status read, retrying transient failures with exponential backoff.
    /// A job the platform does not know is reported immediately.
    pub async fn poll_once(
        &self,
        connection: &dyn ConnectionHandle,
        job_id: &str,
    ) -> Result<(JobStatus, Option<JobProgress>)> {
        let soql = format!(
            "SELECT Id, Status, JobItemsProcessed, TotalJobItems, NumberOfErrors \
             FROM AsyncApexJob WHERE Id = {}",
            connection::quote(job_id)
        );

        let mut attempt = 0;
        loop {
            match connection.execute(Operation::query(soql.clone())).await {
                Ok(payload) => return parse_status(job_id, &payload),
                Err(e) if e.kind == CallErrorKind::NotFound => {
                    return Err(Error::JobNotFound {
                        job_id: job_id.to_string(),
                    });
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff(attempt);
                    warn!(job_id, attempt = attempt + 1, ?delay, error = %e, "status poll failed, retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(Error::from_call(Stage::Wait, e)),
            }
        }
    }
}

fn parse_status(job_id: &str, payload: &Value) -> Result<(JobStatus, Option<JobProgress>)> {
    let Some(row) = connection::records(payload).and_then(|rows| rows.first()) else {
        return Err(Error::JobNotFound {
            job_id: job_id.to_string(),
        });
    };

    let raw = row.get("Status").and_then(Value::as_str).unwrap_or_default();
    let status = JobStatus::from_remote(raw).ok_or_else(|| Error::MalformedResponse {
        stage: Stage::Wait,
        message: format!("unknown job status '{}'", raw),
    })?;

    let count = |field: &str| row.get(field).and_then(Value::as_u64);
    let progress = match (count("JobItemsProcessed"), count("TotalJobItems")) {
        (Some(processed), Some(total)) => Some(JobProgress {
            processed,
            total,
            errors: count("NumberOfErrors").unwrap_or(0),
        }),
        _ => None,
    };
    Ok((status, progress))
}
