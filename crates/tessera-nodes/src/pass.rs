use async_trait::async_trait;
use serde_json::Value;
use tessera_runtime::{Node, NodeContext, NodeError};

/// Returns a fixed value, or its input when no value is set.
#[derive(Debug, Clone)]
pub struct Pass {
  id: String,
  value: Option<Value>,
}

impl Pass {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      value: None,
    }
  }

  pub fn with_value(mut self, value: Value) -> Self {
    self.value = Some(value);
    self
  }
}

#[async_trait]
impl Node for Pass {
  fn id(&self) -> &str {
    &self.id
  }

  fn kind(&self) -> &str {
    "operator"
  }

  async fn execute(&self, input: Value, _ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
    Ok(self.value.clone().unwrap_or(input))
  }
}
