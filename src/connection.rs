use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Which remote API surface an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Api {
    Data,
    Tooling,
}

/// A single remote call, expressed in the platform's own vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Run a query and return the raw `{ totalSize, done, records }` payload.
    Query { api: Api, soql: String },
    /// Insert records of one object type in a single call. Returns an array
    /// of `{ id, success, errors }`, one per record.
    Create { sobject: String, records: Vec<Value> },
    /// POST a JSON body to a tooling endpoint (relative path).
    ToolingPost { path: String, body: Value },
}

impl Operation {
    pub fn query(soql: impl Into<String>) -> Self {
        Operation::Query {
            api: Api::Data,
            soql: soql.into(),
        }
    }

    pub fn tooling_query(soql: impl Into<String>) -> Self {
        Operation::Query {
            api: Api::Tooling,
            soql: soql.into(),
        }
    }

    /// Short label used in log fields.
    pub fn label(&self) -> String {
        match self {
            Operation::Query { api: Api::Data, .. } => "query".into(),
            Operation::Query {
                api: Api::Tooling, ..
            } => "tooling-query".into(),
            Operation::Create { sobject, .. } => format!("create {}", sobject),
            Operation::ToolingPost { path, .. } => format!("post {}", path),
        }
    }
}

/// Coarse classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallErrorKind {
    /// Session expired or revoked; the owner of the connection must reconnect.
    InvalidSession,
    /// The referenced entity (job, record, endpoint) does not exist.
    NotFound,
    /// The authenticated user lacks access to the operation.
    Permission,
    /// The platform rejected the payload or query.
    Malformed,
    /// The API is disabled or not offered for this org.
    Unavailable,
    /// Network-shaped failure; repeating the call may succeed.
    Transient,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct CallError {
    pub kind: CallErrorKind,
    pub message: String,
}

impl CallError {
    pub fn new(kind: CallErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            CallErrorKind::Transient | CallErrorKind::InvalidSession
        )
    }
}

/// An authenticated, already validated session to the remote platform.
///
/// Implementations own their retry and reconnect behaviour. The engine only
/// issues calls through `&self` and never mutates or re-establishes the
/// session.
#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    async fn execute(&self, operation: Operation) -> Result<Value, CallError>;
}

/// Extract the `records` array from a query payload.
pub(crate) fn records(payload: &Value) -> Option<&Vec<Value>> {
    payload.get("records").and_then(Value::as_array)
}

/// Quote a value for inclusion in a query string literal.
pub(crate) fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Render `('a','b')` for an `IN` clause.
pub(crate) fn in_list<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    let quoted: Vec<String> = values.into_iter().map(quote).collect();
    format!("({})", quoted.join(","))
}
