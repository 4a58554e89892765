use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::RunnableConfig;
use crate::connections::ConnectionRegistry;
use crate::error::NodeError;

/// The uniform contract every executable unit implements.
///
/// LLM calls, tools, operators and sub-workflows all sit behind this trait.
/// Structural concerns (dependencies, retries, transformers) live in
/// [`FlowNode`](crate::FlowNode), which wraps a node by composition.
#[async_trait]
pub trait Node: Send + Sync {
  /// Unique id of the node within a workflow.
  fn id(&self) -> &str;

  /// Human-readable name, used in traces.
  fn name(&self) -> &str {
    self.id()
  }

  /// Coarse category (e.g. `tool`, `operator`, `llm`).
  fn kind(&self) -> &str {
    "node"
  }

  /// JSON Schema of the accepted input, derived once at construction.
  fn input_schema(&self) -> Option<&Value> {
    None
  }

  fn output_schema(&self) -> Option<&Value> {
    None
  }

  /// Run the node body.
  async fn execute(&self, input: Value, ctx: &NodeContext<'_>) -> Result<Value, NodeError>;
}

/// What a node can see of the run it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct NodeContext<'a> {
  run_id: &'a str,
  parent_run_id: Option<&'a str>,
  node_id: &'a str,
  config: &'a RunnableConfig,
  connections: &'a ConnectionRegistry,
}

impl<'a> NodeContext<'a> {
  pub fn new(
    run_id: &'a str,
    node_id: &'a str,
    config: &'a RunnableConfig,
    connections: &'a ConnectionRegistry,
  ) -> Self {
    Self {
      run_id,
      parent_run_id: None,
      node_id,
      config,
      connections,
    }
  }

  pub fn with_parent_run_id(mut self, parent_run_id: Option<&'a str>) -> Self {
    self.parent_run_id = parent_run_id;
    self
  }

  pub fn run_id(&self) -> &'a str {
    self.run_id
  }

  pub fn parent_run_id(&self) -> Option<&'a str> {
    self.parent_run_id
  }

  pub fn node_id(&self) -> &'a str {
    self.node_id
  }

  pub fn config(&self) -> &'a RunnableConfig {
    self.config
  }

  pub fn connections(&self) -> &'a ConnectionRegistry {
    self.connections
  }

  pub fn is_cancelled(&self) -> bool {
    self.config.cancellation().is_cancelled()
  }

  /// Resolve a registered connection handle by id.
  pub fn connection<T: Any + Send + Sync>(&self, id: &str) -> Result<Arc<T>, NodeError> {
    if !self.connections.contains(id) {
      return Err(NodeError::Connection {
        id: id.to_string(),
        message: "not registered".to_string(),
      });
    }
    self.connections.get::<T>(id).ok_or_else(|| NodeError::Connection {
      id: id.to_string(),
      message: format!("not a {}", std::any::type_name::<T>()),
    })
  }
}
