use serde::{Deserialize, Serialize};

use crate::enums::ExecutorKind;
use crate::node::NodeDef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  pub workflow_id: String,
  #[serde(default)]
  pub name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub executor: Option<ExecutorDef>,
  pub nodes: Vec<NodeDef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorDef {
  #[serde(default)]
  pub kind: ExecutorKind,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_workers: Option<usize>,
}
