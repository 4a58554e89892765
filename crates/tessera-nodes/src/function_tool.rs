use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};
use tessera_runtime::{Node, NodeContext, NodeError, SchemaType};

use crate::error::BuildError;

type SyncHandler = dyn Fn(Value) -> Result<Value, NodeError> + Send + Sync;
type AsyncHandler = dyn Fn(Value) -> BoxFuture<'static, Result<Value, NodeError>> + Send + Sync;

#[derive(Clone)]
enum Handler {
  Sync(Arc<SyncHandler>),
  Async(Arc<AsyncHandler>),
}

#[derive(Debug, Clone)]
struct Param {
  name: String,
  schema_type: SchemaType,
  required: bool,
  description: Option<String>,
}

/// A Rust function exposed as a tool node.
///
/// The input schema is built once from the declared parameters. The handler
/// receives an object holding only the declared parameters and its return
/// value is wrapped as `{"content": ...}`.
#[derive(Clone)]
pub struct FunctionTool {
  id: String,
  name: String,
  description: String,
  params: Vec<Param>,
  input_schema: Value,
  output_schema: Value,
  handler: Handler,
}

impl FunctionTool {
  pub fn builder(name: impl Into<String>) -> FunctionToolBuilder {
    FunctionToolBuilder {
      id: None,
      name: name.into(),
      description: String::new(),
      params: Vec::new(),
      handler: None,
    }
  }

  pub fn description(&self) -> &str {
    &self.description
  }

  /// Tool descriptor in the shape LLM tool-calling APIs expect.
  pub fn schema(&self) -> Value {
    json!({
      "name": self.name,
      "description": self.description,
      "input_schema": self.input_schema,
      "output_schema": self.output_schema,
    })
  }

  fn arguments(&self, input: Value) -> Result<Value, NodeError> {
    let object = match input {
      Value::Object(object) => object,
      Value::Null => Map::new(),
      other => {
        return Err(NodeError::invalid_input(format!(
          "Invalid input parameters: expected an object, got {}",
          other
        )));
      }
    };

    if self.params.is_empty() {
      return Ok(Value::Object(object));
    }

    let mut problems = Vec::new();
    let mut arguments = Map::new();
    for param in &self.params {
      match object.get(&param.name) {
        Some(value) if !value.is_null() => {
          if param.schema_type.matches(value) {
            arguments.insert(param.name.clone(), value.clone());
          } else {
            problems.push(format!(
              "'{}' expected {}",
              param.name,
              param.schema_type.as_str()
            ));
          }
        }
        _ if param.required => problems.push(format!("'{}' is required", param.name)),
        _ => {}
      }
    }

    if problems.is_empty() {
      Ok(Value::Object(arguments))
    } else {
      Err(NodeError::invalid_input(format!(
        "Invalid input parameters: {}",
        problems.join(", ")
      )))
    }
  }
}

#[async_trait]
impl Node for FunctionTool {
  fn id(&self) -> &str {
    &self.id
  }

  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> &str {
    "tool"
  }

  fn input_schema(&self) -> Option<&Value> {
    Some(&self.input_schema)
  }

  fn output_schema(&self) -> Option<&Value> {
    Some(&self.output_schema)
  }

  async fn execute(&self, input: Value, _ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
    let arguments = self.arguments(input)?;
    let content = match &self.handler {
      Handler::Sync(handler) => handler(arguments)?,
      Handler::Async(handler) => handler(arguments).await?,
    };
    Ok(json!({ "content": content }))
  }
}

impl std::fmt::Debug for FunctionTool {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FunctionTool")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("params", &self.params)
      .finish()
  }
}

/// Builder for [`FunctionTool`].
pub struct FunctionToolBuilder {
  id: Option<String>,
  name: String,
  description: String,
  params: Vec<Param>,
  handler: Option<Handler>,
}

impl FunctionToolBuilder {
  /// Node id within a workflow. Defaults to the tool name.
  pub fn id(mut self, id: impl Into<String>) -> Self {
    self.id = Some(id.into());
    self
  }

  pub fn description(mut self, description: impl Into<String>) -> Self {
    self.description = description.into();
    self
  }

  /// Declare a required parameter.
  pub fn param(self, name: impl Into<String>, schema_type: SchemaType) -> Self {
    self.push_param(name.into(), schema_type, true, None)
  }

  pub fn optional_param(self, name: impl Into<String>, schema_type: SchemaType) -> Self {
    self.push_param(name.into(), schema_type, false, None)
  }

  /// Declare a required parameter with a description for the schema.
  pub fn described_param(
    self,
    name: impl Into<String>,
    schema_type: SchemaType,
    description: impl Into<String>,
  ) -> Self {
    self.push_param(name.into(), schema_type, true, Some(description.into()))
  }

  fn push_param(
    mut self,
    name: String,
    schema_type: SchemaType,
    required: bool,
    description: Option<String>,
  ) -> Self {
    self.params.push(Param {
      name,
      schema_type,
      required,
      description,
    });
    self
  }

  pub fn handler<F>(mut self, handler: F) -> Self
  where
    F: Fn(Value) -> Result<Value, NodeError> + Send + Sync + 'static,
  {
    self.handler = Some(Handler::Sync(Arc::new(handler)));
    self
  }

  pub fn async_handler<F, Fut>(mut self, handler: F) -> Self
  where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, NodeError>> + Send + 'static,
  {
    self.handler = Some(Handler::Async(Arc::new(move |args| handler(args).boxed())));
    self
  }

  pub fn build(self) -> Result<FunctionTool, BuildError> {
    let Some(handler) = self.handler else {
      return Err(BuildError::MissingHandler { name: self.name });
    };

    let mut properties = Map::new();
    let mut required = Vec::new();
    for param in &self.params {
      if properties.contains_key(&param.name) {
        return Err(BuildError::DuplicateParam {
          name: self.name,
          param: param.name.clone(),
        });
      }

      let mut property = Map::new();
      property.insert("type".to_string(), json!(param.schema_type.as_str()));
      if let Some(description) = &param.description {
        property.insert("description".to_string(), json!(description));
      }
      properties.insert(param.name.clone(), Value::Object(property));

      if param.required {
        required.push(json!(param.name));
      }
    }

    let input_schema = json!({
      "type": "object",
      "properties": properties,
      "required": required,
    });
    let output_schema = json!({
      "type": "object",
      "properties": { "content": {} },
      "required": ["content"],
    });

    Ok(FunctionTool {
      id: self.id.unwrap_or_else(|| self.name.clone()),
      name: self.name,
      description: self.description,
      params: self.params,
      input_schema,
      output_schema,
      handler,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tessera_runtime::{ConnectionRegistry, RunnableConfig};

  fn add_tool() -> FunctionTool {
    FunctionTool::builder("add")
      .description("Add two integers")
      .param("a", SchemaType::Integer)
      .described_param("b", SchemaType::Integer, "second operand")
      .handler(|args| {
        let a = args["a"].as_i64().unwrap_or(0);
        let b = args["b"].as_i64().unwrap_or(0);
        Ok(json!(a + b))
      })
      .build()
      .unwrap()
  }

  #[test]
  fn test_schema_is_derived_at_build() {
    let tool = add_tool();
    assert_eq!(tool.id(), "add");
    assert_eq!(tool.kind(), "tool");
    assert_eq!(
      tool.input_schema().unwrap(),
      &json!({
        "type": "object",
        "properties": {
          "a": {"type": "integer"},
          "b": {"type": "integer", "description": "second operand"}
        },
        "required": ["a", "b"]
      })
    );
    assert_eq!(tool.schema()["description"], "Add two integers");
  }

  #[tokio::test]
  async fn test_execute_wraps_content_and_ignores_extra_fields() {
    let config = RunnableConfig::new();
    let connections = ConnectionRegistry::new();
    let ctx = NodeContext::new("run", "add", &config, &connections);

    let output = add_tool()
      .execute(json!({"a": 2, "b": 3, "upstream": {"x": 1}}), &ctx)
      .await
      .unwrap();
    assert_eq!(output, json!({"content": 5}));
  }

  #[tokio::test]
  async fn test_invalid_parameters() {
    let config = RunnableConfig::new();
    let connections = ConnectionRegistry::new();
    let ctx = NodeContext::new("run", "add", &config, &connections);

    let err = add_tool()
      .execute(json!({"a": "two"}), &ctx)
      .await
      .unwrap_err();
    assert!(matches!(err, NodeError::InvalidInput { .. }));
    assert_eq!(
      err.to_string(),
      "invalid input: Invalid input parameters: 'a' expected integer, 'b' is required"
    );
  }

  #[tokio::test]
  async fn test_async_handler_and_optional_param() {
    let tool = FunctionTool::builder("greet")
      .id("greeter")
      .optional_param("name", SchemaType::String)
      .async_handler(|args| async move {
        let name = args["name"].as_str().unwrap_or("world").to_string();
        Ok(json!(format!("hello {}", name)))
      })
      .build()
      .unwrap();

    let config = RunnableConfig::new();
    let connections = ConnectionRegistry::new();
    let ctx = NodeContext::new("run", "greeter", &config, &connections);

    assert_eq!(tool.id(), "greeter");
    assert_eq!(tool.name(), "greet");
    assert_eq!(
      tool.execute(json!({}), &ctx).await.unwrap(),
      json!({"content": "hello world"})
    );
  }

  #[test]
  fn test_build_errors() {
    let missing = FunctionTool::builder("noop").build().unwrap_err();
    assert_eq!(
      missing,
      BuildError::MissingHandler {
        name: "noop".to_string()
      }
    );

    let duplicate = FunctionTool::builder("dup")
      .param("x", SchemaType::String)
      .param("x", SchemaType::Integer)
      .handler(Ok)
      .build()
      .unwrap_err();
    assert!(matches!(duplicate, BuildError::DuplicateParam { .. }));
  }
}
