use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::condition::{ChoiceOptionDef, Condition};
use crate::enums::{RetryBackoff, UpstreamPolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  pub node_id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(flatten)]
  pub kind: NodeKind,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub depends: Vec<DependencyDef>,
  /// Input transformer: field name to JSONPath (`$...`) or template expression.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub inputs: BTreeMap<String, String>,
  /// Output transformer, applied to the node output.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub outputs: BTreeMap<String, String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub input_schema: Option<serde_json::Value>,
  #[serde(default)]
  pub error_handling: ErrorHandlingDef,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub on_upstream_failure: Option<UpstreamPolicy>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub fail_workflow: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
  /// Returns `value` when set, otherwise its input.
  Pass {
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<serde_json::Value>,
  },
  /// Renders each template against the node input.
  Template {
    templates: BTreeMap<String, String>,
  },
  /// Selects the first option whose condition matches.
  Choice { options: Vec<ChoiceOptionDef> },
  /// Runs `node` once per item of the `input` array.
  Map {
    node: Box<NodeDef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_concurrency: Option<usize>,
  },
  /// A node kind provided by a factory registered with the resolver.
  Custom {
    kind: String,
    #[serde(default)]
    params: serde_json::Value,
  },
}

impl NodeKind {
  /// The kind name used in logs and errors.
  pub fn name(&self) -> &str {
    match self {
      NodeKind::Pass { .. } => "pass",
      NodeKind::Template { .. } => "template",
      NodeKind::Choice { .. } => "choice",
      NodeKind::Map { .. } => "map",
      NodeKind::Custom { kind, .. } => kind,
    }
  }
}

/// A dependency on another node.
///
/// Either a bare node id, or an object with an optional choice `option` or
/// `condition` gating the dependent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyDef {
  Node(String),
  Detailed {
    node_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    option: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    condition: Option<Condition>,
  },
}

impl DependencyDef {
  pub fn node_id(&self) -> &str {
    match self {
      DependencyDef::Node(id) => id,
      DependencyDef::Detailed { node_id, .. } => node_id,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorHandlingDef {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_retries: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub retry_interval_ms: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub backoff: Option<RetryBackoff>,
}
