use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tessera_config::{DependencyDef, NodeDef, NodeKind, WorkflowDef};
use tessera_nodes::{Choice, ChoiceOption, Map, Pass, Template};
use tessera_runtime::{
  ConnectionRegistry, Dependency, ErrorHandling, ExecutorConfig, Flow, FlowNode, Node,
  Transformer, Workflow,
};
use tracing::debug;

use crate::error::ResolveError;

/// Builds a node for a custom kind from its definition.
///
/// The returned node must use `def.node_id` as its id.
pub type NodeFactory = Arc<dyn Fn(&NodeDef) -> Result<Arc<dyn Node>, ResolveError> + Send + Sync>;

/// Resolver transforms a WorkflowDef into a runnable Workflow.
pub trait Resolver: Send + Sync {
  /// Resolve a workflow definition.
  ///
  /// This process:
  /// 1. Builds every node, built-in kinds directly and custom kinds through
  ///    their registered factory
  /// 2. Attaches dependencies, transformers and error-handling policy
  /// 3. Validates the graph structure (unique ids, known dependencies, no cycles)
  fn resolve(&self, def: WorkflowDef) -> Result<Workflow, ResolveError>;
}

/// Resolver for the built-in node kinds plus registered custom kinds.
#[derive(Clone, Default)]
pub struct StandardResolver {
  factories: HashMap<String, NodeFactory>,
  connections: ConnectionRegistry,
}

impl StandardResolver {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a factory for `{"type": "custom", "kind": <kind>}` nodes.
  pub fn register<F>(mut self, kind: impl Into<String>, factory: F) -> Self
  where
    F: Fn(&NodeDef) -> Result<Arc<dyn Node>, ResolveError> + Send + Sync + 'static,
  {
    self.factories.insert(kind.into(), Arc::new(factory));
    self
  }

  /// Connections handed to every resolved workflow.
  pub fn with_connections(mut self, connections: ConnectionRegistry) -> Self {
    self.connections = connections;
    self
  }

  /// Kinds with a registered factory, sorted.
  pub fn custom_kinds(&self) -> Vec<&str> {
    let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
    kinds.sort_unstable();
    kinds
  }

  /// Build the node body for a definition, ignoring its placement.
  fn build_node(&self, def: &NodeDef) -> Result<Arc<dyn Node>, ResolveError> {
    let node: Arc<dyn Node> = match &def.kind {
      NodeKind::Pass { value } => {
        let pass = Pass::new(&def.node_id);
        Arc::new(match value {
          Some(value) => pass.with_value(value.clone()),
          None => pass,
        })
      }
      NodeKind::Template { templates } => {
        Arc::new(Template::new(&def.node_id).with_templates(templates.clone()))
      }
      NodeKind::Choice { options } => {
        let options = options.iter().cloned().map(ChoiceOption::from).collect();
        Arc::new(
          Choice::new(&def.node_id, options)
            .map_err(|e| ResolveError::invalid_node(&def.node_id, e.to_string()))?,
        )
      }
      NodeKind::Map {
        node,
        max_concurrency,
      } => {
        if !node.depends.is_empty()
          || node.on_upstream_failure.is_some()
          || node.fail_workflow.is_some()
        {
          return Err(ResolveError::invalid_node(
            &def.node_id,
            format!(
              "map item '{}' cannot declare depends, on_upstream_failure or fail_workflow",
              node.node_id
            ),
          ));
        }
        let map = Map::with_item(&def.node_id, self.resolve_node(node.as_ref().clone())?);
        Arc::new(match max_concurrency {
          Some(n) => map.with_max_concurrency(*n),
          None => map,
        })
      }
      NodeKind::Custom { kind, .. } => {
        let factory = self
          .factories
          .get(kind)
          .ok_or_else(|| ResolveError::UnknownKind {
            node_id: def.node_id.clone(),
            kind: kind.clone(),
          })?;
        let node = factory(def)?;
        if node.id() != def.node_id {
          return Err(ResolveError::invalid_node(
            &def.node_id,
            format!("factory for '{}' built a node with id '{}'", kind, node.id()),
          ));
        }
        node
      }
    };

    debug!(node_id = %def.node_id, kind = %def.kind.name(), "node_resolved");
    Ok(node)
  }

  /// Resolve a single node definition into a placed flow node.
  fn resolve_node(&self, def: NodeDef) -> Result<FlowNode, ResolveError> {
    let mut flow_node = FlowNode::from_arc(self.build_node(&def)?)
      .with_error_handling(ErrorHandling::from(&def.error_handling));

    if let Some(name) = def.name {
      flow_node = flow_node.with_name(name);
    }

    for dependency in def.depends {
      flow_node = flow_node.with_dependency(resolve_dependency(&def.node_id, dependency)?);
    }

    if !def.inputs.is_empty() {
      flow_node = flow_node.with_input(Transformer::from(def.inputs));
    }
    if !def.outputs.is_empty() {
      flow_node = flow_node.with_output(Transformer::from(def.outputs));
    }
    if let Some(schema) = def.input_schema {
      flow_node = flow_node.with_input_schema(schema);
    }
    if let Some(policy) = def.on_upstream_failure {
      flow_node = flow_node.on_upstream_failure(policy);
    }
    if def.fail_workflow == Some(false) {
      flow_node = flow_node.optional();
    }

    Ok(flow_node)
  }
}

impl Resolver for StandardResolver {
  fn resolve(&self, def: WorkflowDef) -> Result<Workflow, ResolveError> {
    let nodes = def
      .nodes
      .into_iter()
      .map(|node| self.resolve_node(node))
      .collect::<Result<Vec<_>, _>>()?;

    let mut flow = Flow::new(def.workflow_id, nodes)?;
    if let Some(executor) = &def.executor {
      flow = flow.with_executor(ExecutorConfig::from(executor));
    }

    let mut workflow = Workflow::new(flow).with_connections(self.connections.clone());
    if !def.name.is_empty() {
      workflow = workflow.with_name(def.name);
    }
    if let Some(timeout_ms) = def.timeout_ms {
      workflow = workflow.with_timeout(Duration::from_millis(timeout_ms));
    }

    Ok(workflow)
  }
}

impl std::fmt::Debug for StandardResolver {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StandardResolver")
      .field("custom_kinds", &self.custom_kinds())
      .field("connections", &self.connections)
      .finish()
  }
}

fn resolve_dependency(node_id: &str, def: DependencyDef) -> Result<Dependency, ResolveError> {
  match def {
    DependencyDef::Node(id) => Ok(Dependency::new(id)),
    DependencyDef::Detailed {
      node_id: upstream,
      option: None,
      condition: None,
    } => Ok(Dependency::new(upstream)),
    DependencyDef::Detailed {
      node_id: upstream,
      option: Some(option),
      condition: None,
    } => Ok(Dependency::option(upstream, option)),
    DependencyDef::Detailed {
      node_id: upstream,
      option: None,
      condition: Some(condition),
    } => Ok(Dependency::when(upstream, condition)),
    DependencyDef::Detailed {
      node_id: upstream, ..
    } => Err(ResolveError::invalid_node(
      node_id,
      format!(
        "dependency on '{}' sets both option and condition",
        upstream
      ),
    )),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use tessera_runtime::{DependencyCondition, UpstreamPolicy, WorkflowError};

  fn parse(value: serde_json::Value) -> WorkflowDef {
    serde_json::from_value(value).unwrap()
  }

  #[test]
  fn test_resolve_builtin_nodes() {
    let def = parse(json!({
      "workflow_id": "greet",
      "name": "Greeting",
      "timeout_ms": 5000,
      "executor": {"kind": "blocking", "max_workers": 2},
      "nodes": [
        {"node_id": "start", "type": "pass"},
        {
          "node_id": "hello",
          "name": "Say hello",
          "type": "template",
          "templates": {"text": "hi {{ who }}"},
          "depends": ["start"],
          "inputs": {"who": "$.start.who"},
          "error_handling": {"max_retries": 2, "timeout_ms": 100},
          "on_upstream_failure": "continue",
          "fail_workflow": false
        }
      ]
    }));

    let workflow = StandardResolver::new().resolve(def).unwrap();
    assert_eq!(workflow.id(), "greet");
    assert_eq!(workflow.name(), "Greeting");
    assert_eq!(workflow.timeout(), Some(Duration::from_millis(5000)));
    assert_eq!(workflow.flow().executor_config(), ExecutorConfig::blocking(2));

    let hello = workflow.get_node("hello").unwrap();
    assert_eq!(hello.name(), "Say hello");
    assert_eq!(hello.node().kind(), "operator");
    assert_eq!(hello.depends(), &[Dependency::new("start")]);
    assert_eq!(hello.error_handling().max_retries, 2);
    assert_eq!(hello.error_handling().timeout, Some(Duration::from_millis(100)));
    assert_eq!(hello.upstream_policy(), UpstreamPolicy::Continue);
    assert!(!hello.fail_workflow());
    assert!(hello.input_transformer().is_some());
  }

  #[test]
  fn test_resolve_choice_dependencies() {
    let def = parse(json!({
      "workflow_id": "route",
      "nodes": [
        {
          "node_id": "route",
          "type": "choice",
          "options": [
            {"id": "big", "condition": {"variable": "$.n", "operator": "numeric_greater_than", "value": 10}},
            {"id": "small"}
          ]
        },
        {"node_id": "a", "type": "pass", "depends": [{"node_id": "route", "option": "big"}]},
        {"node_id": "b", "type": "pass", "depends": [{"node_id": "route", "option": "small"}]}
      ]
    }));

    let workflow = StandardResolver::new().resolve(def).unwrap();
    let a = workflow.get_node("a").unwrap();
    assert_eq!(
      a.depends()[0].condition,
      DependencyCondition::Option {
        option: "big".to_string()
      }
    );
  }

  #[test]
  fn test_choice_without_options_is_invalid() {
    let def = parse(json!({
      "workflow_id": "bad",
      "nodes": [{"node_id": "route", "type": "choice", "options": []}]
    }));

    let err = StandardResolver::new().resolve(def).unwrap_err();
    assert!(matches!(err, ResolveError::InvalidNode { .. }));
  }

  #[test]
  fn test_unknown_custom_kind() {
    let def = parse(json!({
      "workflow_id": "bad",
      "nodes": [{"node_id": "llm", "type": "custom", "kind": "chat_model"}]
    }));

    let err = StandardResolver::new().resolve(def).unwrap_err();
    assert!(matches!(
      err,
      ResolveError::UnknownKind { ref kind, .. } if kind == "chat_model"
    ));
  }

  #[test]
  fn test_custom_factory_must_keep_node_id() {
    let resolver = StandardResolver::new()
      .register("echo", |_def: &NodeDef| -> Result<Arc<dyn Node>, ResolveError> {
        Ok(Arc::new(Pass::new("other")))
      });
    let def = parse(json!({
      "workflow_id": "bad",
      "nodes": [{"node_id": "echo", "type": "custom", "kind": "echo"}]
    }));

    let err = resolver.resolve(def).unwrap_err();
    assert!(matches!(err, ResolveError::InvalidNode { .. }));
  }

  #[test]
  fn test_structural_errors_surface() {
    let unknown = parse(json!({
      "workflow_id": "bad",
      "nodes": [{"node_id": "a", "type": "pass", "depends": ["ghost"]}]
    }));
    assert!(matches!(
      StandardResolver::new().resolve(unknown).unwrap_err(),
      ResolveError::Workflow(WorkflowError::UnknownDependency { .. })
    ));

    let cycle = parse(json!({
      "workflow_id": "bad",
      "nodes": [
        {"node_id": "a", "type": "pass", "depends": ["b"]},
        {"node_id": "b", "type": "pass", "depends": ["a"]}
      ]
    }));
    assert!(matches!(
      StandardResolver::new().resolve(cycle).unwrap_err(),
      ResolveError::Workflow(WorkflowError::CycleDetected { .. })
    ));
  }

  #[test]
  fn test_option_and_condition_conflict() {
    let def = parse(json!({
      "workflow_id": "bad",
      "nodes": [
        {"node_id": "a", "type": "pass"},
        {
          "node_id": "b",
          "type": "pass",
          "depends": [{
            "node_id": "a",
            "option": "x",
            "condition": {"variable": "$.x", "operator": "is_present"}
          }]
        }
      ]
    }));

    let err = StandardResolver::new().resolve(def).unwrap_err();
    assert!(matches!(err, ResolveError::InvalidNode { .. }));
  }

  #[test]
  fn test_map_item_cannot_depend_on_nodes() {
    let def = parse(json!({
      "workflow_id": "bad",
      "nodes": [
        {"node_id": "a", "type": "pass"},
        {
          "node_id": "each",
          "type": "map",
          "node": {"node_id": "item", "type": "pass", "depends": ["a"]}
        }
      ]
    }));

    let err = StandardResolver::new().resolve(def).unwrap_err();
    assert!(matches!(
      err,
      ResolveError::InvalidNode { ref node_id, .. } if node_id == "each"
    ));
  }
}
