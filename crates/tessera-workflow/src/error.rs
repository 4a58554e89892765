use thiserror::Error;

/// Structural errors in a workflow graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
  /// Two nodes share the same id.
  #[error("duplicate node id: {node_id}")]
  DuplicateNodeId { node_id: String },

  /// A node depends on an id that is not part of the workflow.
  #[error("node '{node_id}' depends on unknown node '{dependency}'")]
  UnknownDependency { node_id: String, dependency: String },

  /// The dependency graph contains a cycle through `node_id`.
  #[error("cycle detected in workflow graph at node '{node_id}'")]
  CycleDetected { node_id: String },
}
