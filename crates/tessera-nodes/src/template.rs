use std::collections::BTreeMap;

use async_trait::async_trait;
use minijinja::Environment;
use serde_json::{Map, Value};
use tessera_runtime::{Node, NodeContext, NodeError};

/// Renders named minijinja templates against its input.
///
/// Output is an object of rendered strings keyed like the templates.
#[derive(Debug, Clone)]
pub struct Template {
  id: String,
  templates: BTreeMap<String, String>,
}

impl Template {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      templates: BTreeMap::new(),
    }
  }

  pub fn with_template(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
    self.templates.insert(key.into(), template.into());
    self
  }

  pub fn with_templates(mut self, templates: BTreeMap<String, String>) -> Self {
    self.templates.extend(templates);
    self
  }
}

#[async_trait]
impl Node for Template {
  fn id(&self) -> &str {
    &self.id
  }

  fn kind(&self) -> &str {
    "operator"
  }

  async fn execute(&self, input: Value, _ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
    let env = Environment::new();
    let context = minijinja::Value::from_serialize(&input);

    let mut output = Map::new();
    for (key, template) in &self.templates {
      let rendered = env
        .render_str(template, context.clone())
        .map_err(|e| NodeError::execution(format!("failed to render '{}': {}", key, e)))?;
      output.insert(key.clone(), Value::String(rendered));
    }
    Ok(Value::Object(output))
  }
}
