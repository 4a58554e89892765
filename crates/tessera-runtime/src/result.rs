use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::NodeError;

/// Terminal status of a node or workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnableStatus {
  Success,
  Failure,
  Skip,
}

impl std::fmt::Display for RunnableStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      RunnableStatus::Success => write!(f, "success"),
      RunnableStatus::Failure => write!(f, "failure"),
      RunnableStatus::Skip => write!(f, "skip"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  Execution,
  Timeout,
  InvalidInput,
  Connection,
  UpstreamFailed,
  Skipped,
  Cancelled,
  Panicked,
}

/// Error attached to a FAILURE (or the reason attached to a SKIP).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnableError {
  pub kind: ErrorKind,
  pub message: String,
}

impl RunnableError {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }
}

impl std::fmt::Display for RunnableError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.message)
  }
}

impl From<NodeError> for RunnableError {
  fn from(err: NodeError) -> Self {
    let kind = match &err {
      NodeError::Execution { .. } => ErrorKind::Execution,
      NodeError::InvalidInput { .. } => ErrorKind::InvalidInput,
      NodeError::Connection { .. } => ErrorKind::Connection,
    };
    Self::new(kind, err.to_string())
  }
}

/// Outcome of running a node or a workflow. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnableResult {
  pub status: RunnableStatus,
  #[serde(default)]
  pub input: Value,
  #[serde(default)]
  pub output: Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<RunnableError>,
}

impl RunnableResult {
  pub fn success(input: Value, output: Value) -> Self {
    Self {
      status: RunnableStatus::Success,
      input,
      output,
      error: None,
    }
  }

  pub fn failure(input: Value, error: RunnableError) -> Self {
    Self {
      status: RunnableStatus::Failure,
      input,
      output: Value::Null,
      error: Some(error),
    }
  }

  pub fn skip(input: Value, reason: impl Into<String>) -> Self {
    Self {
      status: RunnableStatus::Skip,
      input,
      output: Value::Null,
      error: Some(RunnableError::new(ErrorKind::Skipped, reason)),
    }
  }

  pub fn is_success(&self) -> bool {
    self.status == RunnableStatus::Success
  }

  pub fn is_failure(&self) -> bool {
    self.status == RunnableStatus::Failure
  }

  pub fn is_skip(&self) -> bool {
    self.status == RunnableStatus::Skip
  }

  /// Plain JSON form: `{"status", "input", "output", "error"}`.
  pub fn to_value(&self) -> Value {
    json!({
      "status": self.status,
      "input": self.input,
      "output": self.output,
      "error": self.error,
    })
  }
}
