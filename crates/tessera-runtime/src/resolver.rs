//! Dependency resolution.
//!
//! Given the per-run [`FlowState`], [`DependencyResolver::get_ready_nodes`]
//! returns every pending node whose dependencies are all done, together with
//! its resolved input and a verdict: run it, or settle it without running.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tessera_config::UpstreamPolicy;

use crate::condition::evaluate_condition;
use crate::flow_node::{Dependency, DependencyCondition, FlowNode};
use crate::input::build_context;
use crate::result::{ErrorKind, RunnableError, RunnableResult, RunnableStatus};

/// Lifecycle of a node within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
  Pending,
  Ready,
  Running,
  Done(RunnableStatus),
}

/// Mutable state of a single flow run. Only the scheduler writes to it.
#[derive(Debug, Clone)]
pub struct FlowState {
  input: Value,
  states: HashMap<String, NodeState>,
  results: HashMap<String, RunnableResult>,
}

impl FlowState {
  pub fn new(nodes: &[Arc<FlowNode>], input: Value) -> Self {
    Self {
      input,
      states: nodes
        .iter()
        .map(|n| (n.id().to_string(), NodeState::Pending))
        .collect(),
      results: HashMap::new(),
    }
  }

  pub fn input(&self) -> &Value {
    &self.input
  }

  pub fn state(&self, node_id: &str) -> Option<NodeState> {
    self.states.get(node_id).copied()
  }

  pub fn is_done(&self, node_id: &str) -> bool {
    matches!(self.state(node_id), Some(NodeState::Done(_)))
  }

  pub fn result(&self, node_id: &str) -> Option<&RunnableResult> {
    self.results.get(node_id)
  }

  pub fn results(&self) -> &HashMap<String, RunnableResult> {
    &self.results
  }

  pub fn set_state(&mut self, node_id: &str, state: NodeState) {
    if let Some(current) = self.states.get_mut(node_id) {
      *current = state;
    }
  }

  /// Record the terminal result of a node. A node completes at most once.
  pub fn complete(&mut self, node_id: &str, result: RunnableResult) -> bool {
    match self.states.get_mut(node_id) {
      Some(state) if !matches!(state, NodeState::Done(_)) => {
        *state = NodeState::Done(result.status);
        self.results.insert(node_id.to_string(), result);
        true
      }
      _ => false,
    }
  }

  /// Ids of nodes in `state`, sorted.
  pub fn ids_in(&self, state: NodeState) -> Vec<String> {
    let mut ids: Vec<String> = self
      .states
      .iter()
      .filter(|(_, s)| **s == state)
      .map(|(id, _)| id.clone())
      .collect();
    ids.sort();
    ids
  }

  pub fn is_finished(&self) -> bool {
    self
      .states
      .values()
      .all(|s| matches!(s, NodeState::Done(_)))
  }

  pub fn into_results(self) -> HashMap<String, RunnableResult> {
    self.results
  }
}

/// Verdict for a node whose dependencies are all done.
#[derive(Debug, Clone, PartialEq)]
pub enum Readiness {
  /// Run the node body.
  Ready,
  /// Record SKIP without running.
  Skip { reason: String },
  /// Record FAILURE without running.
  Fail { error: RunnableError },
}

/// A node whose dependencies are satisfied, with its resolved input.
#[derive(Debug, Clone)]
pub struct NodeReadyToRun {
  pub node: Arc<FlowNode>,
  pub input: Value,
  pub depends_result: BTreeMap<String, RunnableResult>,
  pub readiness: Readiness,
}

impl NodeReadyToRun {
  pub fn node_id(&self) -> &str {
    self.node.id()
  }

  pub fn is_ready(&self) -> bool {
    self.readiness == Readiness::Ready
  }

  /// The result to record for a node that will not run.
  pub fn settled_result(&self) -> Option<RunnableResult> {
    match &self.readiness {
      Readiness::Ready => None,
      Readiness::Skip { reason } => Some(RunnableResult::skip(self.input.clone(), reason.clone())),
      Readiness::Fail { error } => Some(RunnableResult::failure(self.input.clone(), error.clone())),
    }
  }
}

/// Computes which pending nodes can be dispatched.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
  pub fn new() -> Self {
    Self
  }

  /// Pending nodes whose dependencies are all done, in declaration order.
  pub fn get_ready_nodes(&self, nodes: &[Arc<FlowNode>], state: &FlowState) -> Vec<NodeReadyToRun> {
    nodes
      .iter()
      .filter(|node| state.state(node.id()) == Some(NodeState::Pending))
      .filter(|node| node.depends().iter().all(|d| state.is_done(&d.node_id)))
      .map(|node| self.prepare(node, state))
      .collect()
  }

  fn prepare(&self, node: &Arc<FlowNode>, state: &FlowState) -> NodeReadyToRun {
    let depends_result: BTreeMap<String, RunnableResult> = node
      .depends()
      .iter()
      .filter_map(|d| {
        state
          .result(&d.node_id)
          .map(|r| (d.node_id.clone(), r.clone()))
      })
      .collect();

    let context = build_context(state.input(), &depends_result);
    let readiness = self.readiness(node, &depends_result);

    let (input, readiness) = match (readiness, node.input_transformer()) {
      (Readiness::Ready, Some(transformer)) => {
        match transformer.apply(node.id(), &context, node.input_schema()) {
          Ok(input) => (input, Readiness::Ready),
          Err(err) => (
            context,
            Readiness::Fail {
              error: err.into(),
            },
          ),
        }
      }
      (readiness, _) => (context, readiness),
    };

    NodeReadyToRun {
      node: node.clone(),
      input,
      depends_result,
      readiness,
    }
  }

  fn readiness(
    &self,
    node: &FlowNode,
    depends_result: &BTreeMap<String, RunnableResult>,
  ) -> Readiness {
    for dependency in node.depends() {
      let Some(result) = depends_result.get(&dependency.node_id) else {
        continue;
      };

      if !result.is_success() {
        match node.upstream_policy() {
          UpstreamPolicy::Skip => {
            return Readiness::Skip {
              reason: format!("upstream '{}' finished with {}", dependency.node_id, result.status),
            };
          }
          UpstreamPolicy::Fail => {
            return Readiness::Fail {
              error: RunnableError::new(
                ErrorKind::UpstreamFailed,
                format!("upstream '{}' finished with {}", dependency.node_id, result.status),
              ),
            };
          }
          UpstreamPolicy::Continue => {
            if dependency.condition == DependencyCondition::Always {
              continue;
            }
          }
        }
      }

      match condition_met(dependency, &result.output) {
        Ok(true) => {}
        Ok(false) => {
          return Readiness::Skip {
            reason: format!("condition on '{}' not met", dependency.node_id),
          };
        }
        Err(error) => return Readiness::Fail { error },
      }
    }

    Readiness::Ready
  }
}

fn condition_met(dependency: &Dependency, output: &Value) -> Result<bool, RunnableError> {
  match &dependency.condition {
    DependencyCondition::Always => Ok(true),
    DependencyCondition::Option { option } => {
      Ok(output.get(option).and_then(|v| v.as_bool()) == Some(true))
    }
    DependencyCondition::Matches(condition) => {
      evaluate_condition(condition, output).map_err(RunnableError::from)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use async_trait::async_trait;
  use serde_json::json;
  use tessera_config::{Condition, ConditionOperator};

  use crate::error::NodeError;
  use crate::input::Transformer;
  use crate::node::{Node, NodeContext};

  struct Stub(&'static str);

  #[async_trait]
  impl Node for Stub {
    fn id(&self) -> &str {
      self.0
    }

    async fn execute(&self, input: Value, _ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
      Ok(input)
    }
  }

  fn ids(ready: &[NodeReadyToRun]) -> Vec<&str> {
    ready.iter().map(|r| r.node_id()).collect()
  }

  fn diamond() -> Vec<Arc<FlowNode>> {
    vec![
      Arc::new(FlowNode::new(Stub("a"))),
      Arc::new(FlowNode::new(Stub("b")).depends_on("a")),
      Arc::new(FlowNode::new(Stub("c")).depends_on("a")),
      Arc::new(FlowNode::new(Stub("d")).depends_on("b").depends_on("c")),
    ]
  }

  fn success(output: Value) -> RunnableResult {
    RunnableResult::success(Value::Null, output)
  }

  #[test]
  fn test_dependency_free_nodes_are_ready_first() {
    let nodes = diamond();
    let state = FlowState::new(&nodes, json!({}));

    let ready = DependencyResolver::new().get_ready_nodes(&nodes, &state);
    assert_eq!(ids(&ready), vec!["a"]);
    assert!(ready[0].is_ready());
    assert!(ready[0].depends_result.is_empty());
  }

  #[test]
  fn test_join_waits_for_all_dependencies() {
    let nodes = diamond();
    let mut state = FlowState::new(&nodes, json!({}));
    let resolver = DependencyResolver::new();

    state.complete("a", success(json!({"v": 1})));
    assert_eq!(ids(&resolver.get_ready_nodes(&nodes, &state)), vec!["b", "c"]);

    state.set_state("b", NodeState::Running);
    state.set_state("c", NodeState::Running);
    state.complete("b", success(json!({"v": 2})));
    assert!(resolver.get_ready_nodes(&nodes, &state).is_empty());

    state.complete("c", success(json!({"v": 3})));
    let ready = resolver.get_ready_nodes(&nodes, &state);
    assert_eq!(ids(&ready), vec!["d"]);
    assert_eq!(ready[0].input, json!({"b": {"v": 2}, "c": {"v": 3}}));
  }

  #[test]
  fn test_upstream_failure_policies() {
    let nodes = vec![
      Arc::new(FlowNode::new(Stub("a"))),
      Arc::new(FlowNode::new(Stub("skip")).depends_on("a")),
      Arc::new(
        FlowNode::new(Stub("fail"))
          .depends_on("a")
          .on_upstream_failure(UpstreamPolicy::Fail),
      ),
      Arc::new(FlowNode::new(Stub("cont")).depends_on("a").continue_on_failure()),
    ];
    let mut state = FlowState::new(&nodes, json!({}));
    state.complete(
      "a",
      RunnableResult::failure(Value::Null, RunnableError::new(ErrorKind::Execution, "boom")),
    );

    let ready = DependencyResolver::new().get_ready_nodes(&nodes, &state);
    assert!(matches!(ready[0].readiness, Readiness::Skip { .. }));
    match &ready[1].readiness {
      Readiness::Fail { error } => assert_eq!(error.kind, ErrorKind::UpstreamFailed),
      other => panic!("expected fail, got {:?}", other),
    }
    assert!(ready[2].is_ready());
    assert_eq!(ready[2].input, json!({"a": null}));
  }

  #[test]
  fn test_choice_option_dependency() {
    let nodes = vec![
      Arc::new(FlowNode::new(Stub("route"))),
      Arc::new(FlowNode::new(Stub("weekday")).depends_on_option("route", "weekday")),
      Arc::new(FlowNode::new(Stub("weekend")).depends_on_option("route", "weekend")),
    ];
    let mut state = FlowState::new(&nodes, json!({}));
    state.complete("route", success(json!({"weekday": true, "weekend": false})));

    let ready = DependencyResolver::new().get_ready_nodes(&nodes, &state);
    assert!(ready[0].is_ready());
    assert_eq!(
      ready[1].readiness,
      Readiness::Skip {
        reason: "condition on 'route' not met".to_string()
      }
    );
  }

  #[test]
  fn test_conditional_dependency() {
    let condition = Condition::new("$.total", ConditionOperator::NumericGreaterThan, json!(10));
    let nodes = vec![
      Arc::new(FlowNode::new(Stub("score"))),
      Arc::new(FlowNode::new(Stub("big")).depends_on_when("score", condition)),
    ];
    let mut state = FlowState::new(&nodes, json!({}));
    state.complete("score", success(json!({"total": 42})));

    let ready = DependencyResolver::new().get_ready_nodes(&nodes, &state);
    assert!(ready[0].is_ready());
  }

  #[test]
  fn test_input_transformer_applied() {
    let nodes = vec![
      Arc::new(FlowNode::new(Stub("user"))),
      Arc::new(
        FlowNode::new(Stub("greet"))
          .depends_on("user")
          .with_input(
            Transformer::new()
              .field("email", "$.user.email")
              .field("text", "Hi {{ user.name }} ({{ lang }})"),
          ),
      ),
    ];
    let mut state = FlowState::new(&nodes, json!({"lang": "en"}));
    state.complete("user", success(json!({"name": "Ann", "email": "ann@example.com"})));

    let ready = DependencyResolver::new().get_ready_nodes(&nodes, &state);
    assert_eq!(
      ready[0].input,
      json!({"email": "ann@example.com", "text": "Hi Ann (en)"})
    );
  }

  #[test]
  fn test_bad_transformer_fails_node() {
    let nodes = vec![Arc::new(
      FlowNode::new(Stub("n")).with_input(Transformer::new().field("x", "{{ unclosed")),
    )];
    let state = FlowState::new(&nodes, json!({}));

    let ready = DependencyResolver::new().get_ready_nodes(&nodes, &state);
    let settled = ready[0].settled_result().unwrap();
    assert!(settled.is_failure());
    assert_eq!(settled.error.unwrap().kind, ErrorKind::InvalidInput);
  }

  #[test]
  fn test_complete_is_idempotent() {
    let nodes = vec![Arc::new(FlowNode::new(Stub("a")))];
    let mut state = FlowState::new(&nodes, json!({}));
    assert!(state.complete("a", success(json!(1))));
    assert!(!state.complete("a", success(json!(2))));
    assert_eq!(state.result("a").unwrap().output, json!(1));
    assert!(state.is_finished());
  }
}
