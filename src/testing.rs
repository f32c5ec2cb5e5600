//! A `ConnectionHandle` that replays canned responses.
//!
//! Responses are keyed by a substring of the operation's query text, object
//! name or endpoint path. Several responses for the same key are replayed in
//! order and the last one repeats.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::connection::{CallError, CallErrorKind, ConnectionHandle, Operation};

struct Reply {
    delay: Option<Duration>,
    result: Result<Value, CallError>,
}

struct Rule {
    pattern: String,
    replies: VecDeque<Reply>,
}

#[derive(Default)]
pub struct ScriptedConnection {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Operation>>,
}

impl ScriptedConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: &str, result: Result<Value, CallError>) -> Self {
        self.push(pattern, None, result)
    }

    pub fn on_ok(self, pattern: &str, value: Value) -> Self {
        self.on(pattern, Ok(value))
    }

    pub fn on_err(self, pattern: &str, kind: CallErrorKind, message: &str) -> Self {
        self.on(pattern, Err(CallError::new(kind, message)))
    }

    /// Reply only after `delay` has elapsed.
    pub fn on_delayed(self, pattern: &str, delay: Duration, result: Result<Value, CallError>) -> Self {
        self.push(pattern, Some(delay), result)
    }

    fn push(self, pattern: &str, delay: Option<Duration>, result: Result<Value, CallError>) -> Self {
        {
            let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
            let reply = Reply { delay, result };
            match rules.iter_mut().find(|r| r.pattern == pattern) {
                Some(rule) => rule.replies.push_back(reply),
                None => rules.push(Rule {
                    pattern: pattern.to_string(),
                    replies: VecDeque::from([reply]),
                }),
            }
        }
        self
    }

    /// Every operation executed so far, in order.
    pub fn calls(&self) -> Vec<Operation> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of executed operations whose text contains `pattern`.
    pub fn call_count(&self, pattern: &str) -> usize {
        self.calls()
            .iter()
            .filter(|op| operation_text(op).contains(pattern))
            .count()
    }

    fn next_reply(&self, text: &str) -> Option<(Option<Duration>, Result<Value, CallError>)> {
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        let rule = rules.iter_mut().find(|r| text.contains(&r.pattern))?;
        let reply = if rule.replies.len() > 1 {
            rule.replies.pop_front()?
        } else {
            let last = rule.replies.front()?;
            Reply {
                delay: last.delay,
                result: last.result.clone(),
            }
        };
        Some((reply.delay, reply.result))
    }
}

fn operation_text(op: &Operation) -> &str {
    match op {
        Operation::Query { soql, .. } => soql,
        Operation::Create { sobject, .. } => sobject,
        Operation::ToolingPost { path, .. } => path,
    }
}

#[async_trait]
impl ConnectionHandle for ScriptedConnection {
    async fn execute(&self, operation: Operation) -> Result<Value, CallError> {
        let text = operation_text(&operation).to_string();
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(operation);

        let Some((delay, result)) = self.next_reply(&text) else {
            return Err(CallError::new(
                CallErrorKind::Unavailable,
                format!("no scripted response for '{}'", text),
            ));
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

/// Wrap rows in a query payload.
pub fn query_result(records: Vec<Value>) -> Value {
    json!({ "totalSize": records.len(), "done": true, "records": records })
}
