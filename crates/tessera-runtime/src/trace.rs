//! Run tracing.
//!
//! [`TracingCallbackHandler`] turns execution events into a flat list of
//! [`Run`] records (one per workflow and per node execution) and exports them
//! as `{"runs": [...]}` JSON.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{CallbackHandler, ExecutionEvent};
use crate::result::RunnableStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
  Workflow,
  Node,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Running,
  Success,
  Failure,
  Skip,
}

impl From<RunnableStatus> for RunStatus {
  fn from(status: RunnableStatus) -> Self {
    match status {
      RunnableStatus::Success => RunStatus::Success,
      RunnableStatus::Failure => RunStatus::Failure,
      RunnableStatus::Skip => RunStatus::Skip,
    }
  }
}

/// One traced execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parent_run_id: Option<String>,
  pub name: String,
  pub kind: RunKind,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub node_id: Option<String>,
  pub status: RunStatus,
  #[serde(default)]
  pub input: Value,
  #[serde(default)]
  pub output: Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  pub start_time: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub end_time: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub duration_ms: Option<i64>,
}

impl Run {
  fn start(id: &str, parent_run_id: Option<&String>, kind: RunKind, name: &str) -> Self {
    Self {
      id: id.to_string(),
      parent_run_id: parent_run_id.cloned(),
      name: name.to_string(),
      kind,
      node_id: None,
      status: RunStatus::Running,
      input: Value::Null,
      output: Value::Null,
      error: None,
      start_time: Utc::now(),
      end_time: None,
      duration_ms: None,
    }
  }

  fn finish(&mut self, status: RunStatus) {
    let end = Utc::now();
    self.status = status;
    self.duration_ms = Some((end - self.start_time).num_milliseconds());
    self.end_time = Some(end);
  }
}

/// Serialized form of a trace: `{"runs": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceExport {
  pub runs: Vec<Run>,
}

impl TraceExport {
  pub fn from_json(json: &str) -> serde_json::Result<Self> {
    serde_json::from_str(json)
  }

  pub fn to_json(&self) -> serde_json::Result<String> {
    serde_json::to_string(self)
  }
}

#[derive(Debug, Default)]
struct TraceState {
  runs: Vec<Run>,
  index: HashMap<String, usize>,
}

impl TraceState {
  /// Return the run for `id`, creating it if no start event was seen.
  fn entry(&mut self, id: &str, create: impl FnOnce() -> Run) -> &mut Run {
    let position = match self.index.get(id) {
      Some(position) => *position,
      None => {
        self.runs.push(create());
        self.index.insert(id.to_string(), self.runs.len() - 1);
        self.runs.len() - 1
      }
    };
    &mut self.runs[position]
  }
}

/// Callback handler that records runs for export.
#[derive(Debug, Default)]
pub struct TracingCallbackHandler {
  state: Mutex<TraceState>,
}

impl TracingCallbackHandler {
  pub fn new() -> Self {
    Self::default()
  }

  /// Recorded runs in start order.
  pub fn runs(&self) -> Vec<Run> {
    self
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .runs
      .clone()
  }

  pub fn export(&self) -> TraceExport {
    TraceExport { runs: self.runs() }
  }

  pub fn to_json(&self) -> serde_json::Result<String> {
    self.export().to_json()
  }
}

impl CallbackHandler for TracingCallbackHandler {
  fn notify(&self, event: &ExecutionEvent) {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

    match event {
      ExecutionEvent::WorkflowStarted {
        run_id,
        workflow_id,
        input,
      } => {
        let run = state.entry(run_id, || {
          Run::start(run_id, None, RunKind::Workflow, workflow_id)
        });
        run.input = input.clone();
      }
      ExecutionEvent::WorkflowCompleted {
        run_id,
        workflow_id,
        output,
      } => {
        let run = state.entry(run_id, || {
          Run::start(run_id, None, RunKind::Workflow, workflow_id)
        });
        run.output = output.clone();
        run.finish(RunStatus::Success);
      }
      ExecutionEvent::WorkflowFailed {
        run_id,
        workflow_id,
        output,
        error,
      } => {
        let run = state.entry(run_id, || {
          Run::start(run_id, None, RunKind::Workflow, workflow_id)
        });
        run.output = output.clone();
        run.error = Some(error.clone());
        run.finish(RunStatus::Failure);
      }
      ExecutionEvent::NodeStarted {
        run_id,
        parent_run_id,
        node_id,
        name,
        input,
      } => {
        let run = state.entry(run_id, || {
          Run::start(run_id, parent_run_id.as_ref(), RunKind::Node, name)
        });
        run.node_id = Some(node_id.clone());
        run.input = input.clone();
      }
      ExecutionEvent::NodeCompleted {
        run_id,
        parent_run_id,
        node_id,
        output,
      } => {
        let run = state.entry(run_id, || {
          Run::start(run_id, parent_run_id.as_ref(), RunKind::Node, node_id)
        });
        run.node_id = Some(node_id.clone());
        run.output = output.clone();
        run.finish(RunStatus::Success);
      }
      ExecutionEvent::NodeFailed {
        run_id,
        parent_run_id,
        node_id,
        error,
      } => {
        let run = state.entry(run_id, || {
          Run::start(run_id, parent_run_id.as_ref(), RunKind::Node, node_id)
        });
        run.node_id = Some(node_id.clone());
        run.error = Some(error.message.clone());
        run.finish(RunStatus::Failure);
      }
      ExecutionEvent::NodeSkipped {
        run_id,
        parent_run_id,
        node_id,
        name,
        input,
        reason,
      } => {
        let run = state.entry(run_id, || {
          Run::start(run_id, parent_run_id.as_ref(), RunKind::Node, name)
        });
        run.node_id = Some(node_id.clone());
        run.input = input.clone();
        run.error = Some(reason.clone());
        run.finish(RunStatus::Skip);
      }
    }
  }
}
