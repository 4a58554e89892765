//! Resolve JSON workflow definitions and run them.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tessera_config::{NodeDef, NodeKind, WorkflowDef};
use tessera_nodes::FunctionTool;
use tessera_resolver::{ResolveError, Resolver, StandardResolver};
use tessera_runtime::{
  ConnectionRegistry, Node, NodeContext, NodeError, RunnableConfig, RunnableStatus, SchemaType,
};

/// Multiplies its `v` input by a factor taken from the node params.
struct Scale {
  id: String,
  factor: i64,
}

#[async_trait]
impl Node for Scale {
  fn id(&self) -> &str {
    &self.id
  }

  async fn execute(&self, input: Value, _ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
    let v = input["v"]
      .as_i64()
      .ok_or_else(|| NodeError::invalid_input("'v' must be an integer"))?;
    Ok(json!({ "v": v * self.factor }))
  }
}

fn scale_factory(def: &NodeDef) -> Result<Arc<dyn Node>, ResolveError> {
  let NodeKind::Custom { params, .. } = &def.kind else {
    return Err(ResolveError::invalid_node(&def.node_id, "not a custom node"));
  };
  let factor = params["factor"]
    .as_i64()
    .ok_or_else(|| ResolveError::invalid_node(&def.node_id, "missing 'factor'"))?;
  Ok(Arc::new(Scale {
    id: def.node_id.clone(),
    factor,
  }))
}

fn sum_factory(def: &NodeDef) -> Result<Arc<dyn Node>, ResolveError> {
  let tool = FunctionTool::builder("sum")
    .id(&def.node_id)
    .param("x", SchemaType::Integer)
    .param("y", SchemaType::Integer)
    .handler(|args| {
      let x = args["x"].as_i64().unwrap_or(0);
      let y = args["y"].as_i64().unwrap_or(0);
      Ok(json!(x + y))
    })
    .build()
    .map_err(|e| ResolveError::invalid_node(&def.node_id, e.to_string()))?;
  Ok(Arc::new(tool))
}

fn resolver() -> StandardResolver {
  StandardResolver::new()
    .register("scale", scale_factory)
    .register("sum", sum_factory)
}

fn parse(value: Value) -> WorkflowDef {
  serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_resolved_join_sums_upstreams() {
  let def = parse(json!({
    "workflow_id": "sum",
    "nodes": [
      {"node_id": "a", "type": "pass", "value": {"v": 1}},
      {"node_id": "b", "type": "pass", "value": {"v": 1}},
      {
        "node_id": "c",
        "type": "custom",
        "kind": "sum",
        "depends": ["a", "b"],
        "inputs": {"x": "$.a.v", "y": "{{ b.v }}"},
        "outputs": {"v": "$.content"}
      }
    ]
  }));

  let workflow = resolver().resolve(def).unwrap();
  let result = workflow.run(json!({}), &RunnableConfig::new()).await.unwrap();

  assert_eq!(result.status, RunnableStatus::Success);
  assert_eq!(result.output["c"]["output"], json!({"v": 2}));
}

#[tokio::test]
async fn test_condition_dependency_gates_branch() {
  let def = parse(json!({
    "workflow_id": "gate",
    "nodes": [
      {"node_id": "start", "type": "pass"},
      {
        "node_id": "big",
        "type": "custom",
        "kind": "scale",
        "params": {"factor": 10},
        "depends": [{
          "node_id": "start",
          "condition": {"variable": "$.v", "operator": "numeric_greater_than", "value": 5}
        }]
      },
      {
        "node_id": "small",
        "type": "custom",
        "kind": "scale",
        "params": {"factor": 2},
        "depends": [{
          "node_id": "start",
          "condition": {"variable": "$.v", "operator": "numeric_greater_than", "value": 5, "is_not": true}
        }],
        "inputs": {"v": "$.start.v"}
      }
    ]
  }));

  let workflow = resolver().resolve(def).unwrap();
  let result = workflow
    .run(json!({"v": 3}), &RunnableConfig::new())
    .await
    .unwrap();

  assert_eq!(result.status, RunnableStatus::Success);
  assert_eq!(result.output["big"]["status"], "skip");
  assert_eq!(result.output["small"]["output"], json!({"v": 6}));
}

#[tokio::test]
async fn test_map_of_custom_nodes() {
  let def = parse(json!({
    "workflow_id": "scale-all",
    "nodes": [{
      "node_id": "each",
      "type": "map",
      "max_concurrency": 2,
      "node": {"node_id": "item", "type": "custom", "kind": "scale", "params": {"factor": 3}},
      "inputs": {"input": "$.items"}
    }]
  }));

  let workflow = resolver().resolve(def).unwrap();
  let result = workflow
    .run(json!({"items": [{"v": 1}, {"v": 2}]}), &RunnableConfig::new())
    .await
    .unwrap();

  assert_eq!(
    result.output["each"]["output"],
    json!({"output": [{"v": 3}, {"v": 6}]})
  );
}

#[tokio::test]
async fn test_map_item_transformers_apply_per_item() {
  let def = parse(json!({
    "workflow_id": "greet-all",
    "nodes": [{
      "node_id": "each",
      "type": "map",
      "node": {
        "node_id": "greet",
        "type": "template",
        "templates": {"out": "{{ name }}"},
        "inputs": {"name": "$.who"}
      }
    }]
  }));

  let workflow = resolver().resolve(def).unwrap();
  let result = workflow
    .run(json!({"input": [{"who": "ann"}, {"who": "bo"}]}), &RunnableConfig::new())
    .await
    .unwrap();

  assert_eq!(result.status, RunnableStatus::Success);
  assert_eq!(
    result.output["each"]["output"],
    json!({"output": [{"out": "ann"}, {"out": "bo"}]})
  );
}

#[tokio::test]
async fn test_map_item_outputs_and_schema() {
  let def = parse(json!({
    "workflow_id": "scale-all",
    "nodes": [{
      "node_id": "each",
      "type": "map",
      "node": {
        "node_id": "item",
        "type": "custom",
        "kind": "scale",
        "params": {"factor": 2},
        "inputs": {"v": "$.amount"},
        "input_schema": {
          "type": "object",
          "properties": {"v": {"type": "integer"}},
          "required": ["v"]
        },
        "outputs": {"scaled": "$.v"},
        "error_handling": {"timeout_ms": 1000, "max_retries": 1, "retry_interval_ms": 1}
      },
      "inputs": {"input": "$.items"}
    }]
  }));

  let workflow = resolver().resolve(def).unwrap();
  let result = workflow
    .run(
      json!({"items": [{"amount": 1}, {"amount": 4}]}),
      &RunnableConfig::new(),
    )
    .await
    .unwrap();

  assert_eq!(
    result.output["each"]["output"],
    json!({"output": [{"scaled": 2}, {"scaled": 8}]})
  );
}

#[tokio::test]
async fn test_resolver_connections_reach_workflow() {
  let connections = ConnectionRegistry::new().with("db", String::from("postgres://local"));
  let def = parse(json!({
    "workflow_id": "conn",
    "nodes": [{"node_id": "a", "type": "pass"}]
  }));

  let workflow = resolver()
    .with_connections(connections)
    .resolve(def)
    .unwrap();
  assert!(workflow.connections().contains("db"));
}
