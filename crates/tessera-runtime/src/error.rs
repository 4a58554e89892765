//! Runtime error types.

use tessera_workflow::WorkflowError;

/// Errors a node body reports. They become FAILURE results, never panics.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
  /// The node ran and failed.
  #[error("{message}")]
  Execution { message: String },

  /// The node input did not match what the node accepts.
  #[error("invalid input: {message}")]
  InvalidInput { message: String },

  /// A connection handle could not be resolved from the registry.
  #[error("connection '{id}' unavailable: {message}")]
  Connection { id: String, message: String },
}

impl NodeError {
  pub fn execution(message: impl Into<String>) -> Self {
    Self::Execution {
      message: message.into(),
    }
  }

  pub fn invalid_input(message: impl Into<String>) -> Self {
    Self::InvalidInput {
      message: message.into(),
    }
  }
}

/// Bookkeeping faults inside the pool executor.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
  /// A worker finished for a node the executor was not tracking.
  #[error("completed task for untracked node '{node_id}'")]
  UnknownTask { node_id: String },

  /// A worker was cancelled while the executor still expected its result.
  #[error("worker cancelled unexpectedly: {message}")]
  WorkerCancelled { message: String },
}

/// Errors that abort a flow run. Node failures are results, not errors.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
  /// The workflow graph is structurally invalid.
  #[error(transparent)]
  Workflow(#[from] WorkflowError),

  /// Nodes remain pending but none can ever become ready.
  #[error("flow deadlocked: nodes {pending:?} can never become ready")]
  Deadlock { pending: Vec<String> },

  /// The executor lost track of its workers.
  #[error("executor failure: {0}")]
  Executor(#[from] ExecutorError),
}
