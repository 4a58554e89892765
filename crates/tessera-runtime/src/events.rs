//! Execution events and callback handlers for observability.
//!
//! Events are emitted during workflow execution so consumers can observe
//! progress, build traces, persist state, stream to UIs, etc. Handlers receive
//! shared references and cannot alter results.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::result::RunnableError;

/// Events emitted during workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
  /// Workflow execution has started.
  WorkflowStarted {
    run_id: String,
    workflow_id: String,
    input: Value,
  },

  /// Workflow execution has finished and every fail-workflow node succeeded.
  WorkflowCompleted {
    run_id: String,
    workflow_id: String,
    output: Value,
  },

  /// Workflow execution has failed.
  WorkflowFailed {
    run_id: String,
    workflow_id: String,
    output: Value,
    error: String,
  },

  /// A node body is about to run.
  NodeStarted {
    run_id: String,
    parent_run_id: Option<String>,
    node_id: String,
    name: String,
    input: Value,
  },

  /// A node has completed successfully.
  NodeCompleted {
    run_id: String,
    parent_run_id: Option<String>,
    node_id: String,
    output: Value,
  },

  /// A node has failed. Nodes failed by an upstream policy have no start event.
  NodeFailed {
    run_id: String,
    parent_run_id: Option<String>,
    node_id: String,
    error: RunnableError,
  },

  /// A node was skipped without running.
  NodeSkipped {
    run_id: String,
    parent_run_id: Option<String>,
    node_id: String,
    name: String,
    input: Value,
    reason: String,
  },
}

impl ExecutionEvent {
  pub fn run_id(&self) -> &str {
    match self {
      ExecutionEvent::WorkflowStarted { run_id, .. }
      | ExecutionEvent::WorkflowCompleted { run_id, .. }
      | ExecutionEvent::WorkflowFailed { run_id, .. }
      | ExecutionEvent::NodeStarted { run_id, .. }
      | ExecutionEvent::NodeCompleted { run_id, .. }
      | ExecutionEvent::NodeFailed { run_id, .. }
      | ExecutionEvent::NodeSkipped { run_id, .. } => run_id,
    }
  }
}

/// Trait for receiving execution events.
///
/// Handlers are called in registration order from whichever worker produced
/// the event, so implementations must be cheap and thread-safe.
pub trait CallbackHandler: Send + Sync {
  /// Called when an execution event occurs.
  fn notify(&self, event: &ExecutionEvent);
}

/// A handler that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopHandler;

impl CallbackHandler for NoopHandler {
  fn notify(&self, _event: &ExecutionEvent) {}
}

/// A handler that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelHandler {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl CallbackHandler for ChannelHandler {
  fn notify(&self, event: &ExecutionEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event.clone());
  }
}

/// A handler that writes every event as a structured `tracing` record.
///
/// Workflow boundaries are logged at debug level since [`Workflow::run`](crate::Workflow::run)
/// already records them.
#[derive(Debug, Clone, Default)]
pub struct LoggingHandler;

impl CallbackHandler for LoggingHandler {
  fn notify(&self, event: &ExecutionEvent) {
    match event {
      ExecutionEvent::WorkflowStarted {
        run_id,
        workflow_id,
        ..
      } => debug!(run_id = %run_id, workflow_id = %workflow_id, "workflow_started"),
      ExecutionEvent::WorkflowCompleted {
        run_id,
        workflow_id,
        ..
      } => debug!(run_id = %run_id, workflow_id = %workflow_id, "workflow_completed"),
      ExecutionEvent::WorkflowFailed {
        run_id,
        workflow_id,
        error,
        ..
      } => debug!(run_id = %run_id, workflow_id = %workflow_id, error = %error, "workflow_failed"),
      ExecutionEvent::NodeStarted {
        run_id, node_id, ..
      } => info!(run_id = %run_id, node_id = %node_id, "node_started"),
      ExecutionEvent::NodeCompleted {
        run_id,
        node_id,
        output,
        ..
      } => info!(run_id = %run_id, node_id = %node_id, output = %output, "node_completed"),
      ExecutionEvent::NodeFailed {
        run_id,
        node_id,
        error,
        ..
      } => warn!(run_id = %run_id, node_id = %node_id, error = %error, "node_failed"),
      ExecutionEvent::NodeSkipped {
        run_id,
        node_id,
        reason,
        ..
      } => info!(run_id = %run_id, node_id = %node_id, reason = %reason, "node_skipped"),
    }
  }
}
