//! Input resolution.
//!
//! A node's input is built from the workflow input and the outputs of its
//! upstream nodes. The default context is the workflow input object with each
//! upstream output added under the upstream node id:
//! ```json
//! { "query": "rust", "fetch_user": { "email": "a@b.c" }, "score": { "v": 3 } }
//! ```
//!
//! A [`Transformer`] maps field names to expressions resolved against that
//! context:
//! - expressions starting with `$` are JSONPath (`$.fetch_user.email`) and keep
//!   the selected value's JSON type;
//! - anything else is a minijinja template (`Hello {{ fetch_user.name | title }}`),
//!   rendered to a string and then coerced using the node's input schema.

use std::collections::{BTreeMap, HashMap};

use minijinja::Environment;
use serde_json::Value;

use crate::error::NodeError;
use crate::result::RunnableResult;

/// JSON Schema type definitions for input coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
  String,
  Number,
  Integer,
  Boolean,
  Null,
  Array,
  Object,
}

impl SchemaType {
  pub fn as_str(&self) -> &'static str {
    match self {
      SchemaType::String => "string",
      SchemaType::Number => "number",
      SchemaType::Integer => "integer",
      SchemaType::Boolean => "boolean",
      SchemaType::Null => "null",
      SchemaType::Array => "array",
      SchemaType::Object => "object",
    }
  }

  /// Whether `value` already has this JSON type.
  pub fn matches(&self, value: &Value) -> bool {
    match self {
      SchemaType::String => value.is_string(),
      SchemaType::Number => value.is_number(),
      SchemaType::Integer => value.is_i64() || value.is_u64(),
      SchemaType::Boolean => value.is_boolean(),
      SchemaType::Null => value.is_null(),
      SchemaType::Array => value.is_array(),
      SchemaType::Object => value.is_object(),
    }
  }

  fn parse(type_str: &str) -> Self {
    match type_str {
      "number" => SchemaType::Number,
      "integer" => SchemaType::Integer,
      "boolean" => SchemaType::Boolean,
      "null" => SchemaType::Null,
      "array" => SchemaType::Array,
      "object" => SchemaType::Object,
      _ => SchemaType::String,
    }
  }
}

/// Field name to expression mapping applied to a node's input or output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transformer {
  fields: BTreeMap<String, String>,
}

impl Transformer {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a field resolved from `expression`.
  pub fn field(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
    self.fields.insert(name.into(), expression.into());
    self
  }

  pub fn fields(&self) -> &BTreeMap<String, String> {
    &self.fields
  }

  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }

  /// Resolve every field against `context`.
  pub fn apply(
    &self,
    node_id: &str,
    context: &Value,
    schema: Option<&Value>,
  ) -> Result<Value, NodeError> {
    let types = schema.map(extract_schema_types).unwrap_or_default();
    let env = Environment::new();
    let ctx_value = minijinja::Value::from_serialize(context);

    let mut result = serde_json::Map::new();
    for (key, expression) in &self.fields {
      let value = if expression.starts_with('$') {
        select_path(context, expression).map_err(|e| {
          NodeError::invalid_input(format!(
            "node '{}': failed to resolve input '{}': {}",
            node_id, key, e
          ))
        })?
      } else {
        let rendered = env
          .render_str(expression, ctx_value.clone())
          .map_err(|e| {
            NodeError::invalid_input(format!(
              "node '{}': failed to resolve input '{}': {}",
              node_id, key, e
            ))
          })?;
        let schema_type = types.get(key).unwrap_or(&SchemaType::String);
        coerce_value(node_id, key, &rendered, schema_type)?
      };
      result.insert(key.clone(), value);
    }

    Ok(Value::Object(result))
  }
}

impl From<BTreeMap<String, String>> for Transformer {
  fn from(fields: BTreeMap<String, String>) -> Self {
    Self { fields }
  }
}

/// Build the default input context from the workflow input and upstream results.
///
/// A non-object workflow input is kept under the `input` key. A successful
/// upstream contributes its output; any other upstream contributes its whole
/// result (status, input, output, error).
pub fn build_context(input: &Value, depends: &BTreeMap<String, RunnableResult>) -> Value {
  let mut context = match input {
    Value::Object(map) => map.clone(),
    Value::Null => serde_json::Map::new(),
    other => {
      let mut map = serde_json::Map::new();
      map.insert("input".to_string(), other.clone());
      map
    }
  };

  for (node_id, result) in depends {
    let value = if result.is_success() {
      result.output.clone()
    } else {
      result.to_value()
    };
    context.insert(node_id.clone(), value);
  }

  Value::Object(context)
}

/// Select a JSONPath expression from `value`.
///
/// No match yields null, one match the value itself, several an array.
pub fn select_path(value: &Value, path: &str) -> Result<Value, String> {
  let mut matches = jsonpath_lib::select(value, path)
    .map_err(|e| format!("invalid path '{}': {:?}", path, e))?;

  Ok(match matches.len() {
    0 => Value::Null,
    1 => matches.remove(0).clone(),
    _ => Value::Array(matches.into_iter().cloned().collect()),
  })
}

/// Extract schema types from a JSON Schema object.
///
/// Only handles simple object schemas with "properties".
pub fn extract_schema_types(json_schema: &Value) -> HashMap<String, SchemaType> {
  let mut types = HashMap::new();

  if let Some(properties) = json_schema.get("properties").and_then(|p| p.as_object()) {
    for (name, prop_schema) in properties {
      if let Some(type_str) = prop_schema.get("type").and_then(|t| t.as_str()) {
        types.insert(name.clone(), SchemaType::parse(type_str));
      }
    }
  }

  types
}

/// Check that every `required` property of `schema` is present in `input`.
pub fn validate_required(node_id: &str, schema: &Value, input: &Value) -> Result<(), NodeError> {
  let Some(required) = schema.get("required").and_then(|r| r.as_array()) else {
    return Ok(());
  };

  let missing: Vec<&str> = required
    .iter()
    .filter_map(|r| r.as_str())
    .filter(|field| input.get(field).is_none_or(|v| v.is_null()))
    .collect();

  if missing.is_empty() {
    Ok(())
  } else {
    Err(NodeError::invalid_input(format!(
      "node '{}' missing required input: {}",
      node_id,
      missing.join(", ")
    )))
  }
}

/// Coerce a rendered template string to a typed JSON value.
fn coerce_value(
  node_id: &str,
  input_key: &str,
  value: &str,
  schema_type: &SchemaType,
) -> Result<Value, NodeError> {
  let mismatch = |expected: &str| {
    NodeError::invalid_input(format!(
      "node '{}': input '{}' expected {}, got '{}'",
      node_id, input_key, expected, value
    ))
  };

  match schema_type {
    SchemaType::String => Ok(Value::String(value.to_string())),

    SchemaType::Number => value
      .parse::<f64>()
      .map(|n| {
        serde_json::Number::from_f64(n)
          .map(Value::Number)
          .unwrap_or(Value::Null)
      })
      .map_err(|_| mismatch("number")),

    SchemaType::Integer => value
      .parse::<i64>()
      .map(|n| Value::Number(n.into()))
      .map_err(|_| mismatch("integer")),

    SchemaType::Boolean => match value.to_lowercase().as_str() {
      "true" => Ok(Value::Bool(true)),
      "false" => Ok(Value::Bool(false)),
      _ => Err(mismatch("boolean")),
    },

    SchemaType::Null => {
      if value.is_empty() || value == "null" {
        Ok(Value::Null)
      } else {
        Err(mismatch("null"))
      }
    }

    SchemaType::Array | SchemaType::Object => {
      let parsed: Value = serde_json::from_str(value).map_err(|_| mismatch(schema_type.as_str()))?;
      if schema_type.matches(&parsed) {
        Ok(parsed)
      } else {
        Err(mismatch(schema_type.as_str()))
      }
    }
  }
}
