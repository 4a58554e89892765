use thiserror::Error;

/// Errors raised while building a node.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
  /// A function tool was built without a handler.
  #[error("tool '{name}' has no handler")]
  MissingHandler { name: String },

  /// A parameter was declared twice.
  #[error("tool '{name}' declares parameter '{param}' twice")]
  DuplicateParam { name: String, param: String },

  /// A choice node has no options.
  #[error("choice '{node_id}' has no options")]
  NoOptions { node_id: String },
}
