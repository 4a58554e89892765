use thiserror::Error;

/// Errors that can occur while building a workflow from its definition.
#[derive(Debug, Error)]
pub enum ResolveError {
  /// The node graph is invalid (duplicate ids, unknown dependencies, cycles).
  #[error(transparent)]
  Workflow(#[from] tessera_workflow::WorkflowError),

  /// No factory is registered for a custom node kind.
  #[error("node '{node_id}': unknown node kind '{kind}'")]
  UnknownKind { node_id: String, kind: String },

  /// A node definition could not be turned into a node.
  #[error("node '{node_id}': {message}")]
  InvalidNode { node_id: String, message: String },
}

impl ResolveError {
  pub fn invalid_node(node_id: impl Into<String>, message: impl Into<String>) -> Self {
    Self::InvalidNode {
      node_id: node_id.into(),
      message: message.into(),
    }
  }
}
