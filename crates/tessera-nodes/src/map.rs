use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use serde_json::{Value, json};
use tessera_runtime::{FlowNode, Node, NodeContext, NodeError};
use tracing::debug;

pub const DEFAULT_MAP_CONCURRENCY: usize = 8;

/// Applies an inner node to every item of an array.
///
/// Items come from the input itself when it is an array, or from its `input`
/// field. Each item runs through the inner [`FlowNode`], so its input and
/// output transformers, schema checks, timeout and retries apply per item.
/// At most `max_concurrency` items run at once and the output keeps item
/// order: `{"output": [...]}`. The first failing item fails the map.
#[derive(Clone)]
pub struct Map {
  id: String,
  item: Arc<FlowNode>,
  max_concurrency: usize,
}

impl Map {
  pub fn new(id: impl Into<String>, node: Arc<dyn Node>) -> Self {
    Self::with_item(id, FlowNode::from_arc(node))
  }

  /// Map over items with a fully configured inner node.
  ///
  /// Dependencies on the inner node are ignored; it only ever sees the item.
  pub fn with_item(id: impl Into<String>, item: FlowNode) -> Self {
    Self {
      id: id.into(),
      item: Arc::new(item),
      max_concurrency: DEFAULT_MAP_CONCURRENCY,
    }
  }

  pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
    self.max_concurrency = max_concurrency.max(1);
    self
  }

  pub fn item(&self) -> &FlowNode {
    &self.item
  }

  fn items(input: Value) -> Result<Vec<Value>, NodeError> {
    match input {
      Value::Array(items) => Ok(items),
      Value::Object(mut object) => match object.remove("input") {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(NodeError::invalid_input("map expects an array in 'input'")),
      },
      other => Err(NodeError::invalid_input(format!(
        "map expects an array, got {}",
        other
      ))),
    }
  }

  async fn run_item(
    &self,
    index: usize,
    item: Value,
    ctx: &NodeContext<'_>,
  ) -> Result<Value, NodeError> {
    if ctx.is_cancelled() {
      return Err(NodeError::execution(format!("item {} cancelled", index)));
    }

    let node = self.item.as_ref();
    let input = match node.input_transformer() {
      Some(transformer) => transformer
        .apply(node.id(), &item, node.input_schema())
        .map_err(|e| NodeError::execution(format!("item {} failed: {}", index, e)))?,
      None => item,
    };

    let run_id = uuid::Uuid::new_v4().to_string();
    let item_ctx = NodeContext::new(&run_id, node.id(), ctx.config(), ctx.connections())
      .with_parent_run_id(Some(ctx.run_id()));

    let result = node.run(input, &item_ctx).await;
    if result.is_success() {
      return Ok(result.output);
    }
    let reason = match result.error {
      Some(error) => error.message,
      None => result.status.to_string(),
    };
    Err(NodeError::execution(format!("item {} failed: {}", index, reason)))
  }
}

#[async_trait]
impl Node for Map {
  fn id(&self) -> &str {
    &self.id
  }

  fn kind(&self) -> &str {
    "map"
  }

  async fn execute(&self, input: Value, ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
    let items = Self::items(input)?;
    debug!(node_id = %self.id, items = items.len(), "map_started");

    let outputs: Vec<Value> = stream::iter(items.into_iter().enumerate())
      .map(|(index, item)| self.run_item(index, item, ctx))
      .buffered(self.max_concurrency)
      .try_collect()
      .await?;

    Ok(json!({ "output": outputs }))
  }
}

impl std::fmt::Debug for Map {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Map")
      .field("id", &self.id)
      .field("item", &self.item.id())
      .field("max_concurrency", &self.max_concurrency)
      .finish()
  }
}
