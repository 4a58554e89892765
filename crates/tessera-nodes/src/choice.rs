use async_trait::async_trait;
use serde_json::{Map, Value};
use tessera_config::{ChoiceOptionDef, Condition};
use tessera_runtime::{Node, NodeContext, NodeError, evaluate_condition};
use tracing::debug;

use crate::error::BuildError;

/// A branch of a [`Choice`]. Without a condition the option always matches.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceOption {
  pub id: String,
  pub name: Option<String>,
  pub condition: Option<Condition>,
}

impl ChoiceOption {
  pub fn new(id: impl Into<String>, condition: Condition) -> Self {
    Self {
      id: id.into(),
      name: None,
      condition: Some(condition),
    }
  }

  /// Fallback branch taken when no earlier option matched.
  pub fn otherwise(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      name: None,
      condition: None,
    }
  }
}

impl From<ChoiceOptionDef> for ChoiceOption {
  fn from(def: ChoiceOptionDef) -> Self {
    Self {
      id: def.id,
      name: def.name,
      condition: def.condition,
    }
  }
}

/// Conditional branching operator.
///
/// Options are evaluated in order against the node input and the first match
/// wins. The output maps every option id to whether it was selected, e.g.
/// `{"weekday": true, "weekend": false}`; if nothing matches every entry is
/// false and all gated dependents are skipped.
#[derive(Debug, Clone)]
pub struct Choice {
  id: String,
  options: Vec<ChoiceOption>,
}

impl Choice {
  pub fn new(id: impl Into<String>, options: Vec<ChoiceOption>) -> Result<Self, BuildError> {
    let id = id.into();
    if options.is_empty() {
      return Err(BuildError::NoOptions { node_id: id });
    }
    Ok(Self { id, options })
  }

  pub fn options(&self) -> &[ChoiceOption] {
    &self.options
  }

  fn select(&self, input: &Value) -> Result<Option<&str>, NodeError> {
    for option in &self.options {
      let matched = match &option.condition {
        Some(condition) => evaluate_condition(condition, input)?,
        None => true,
      };
      if matched {
        return Ok(Some(&option.id));
      }
    }
    Ok(None)
  }
}

#[async_trait]
impl Node for Choice {
  fn id(&self) -> &str {
    &self.id
  }

  fn kind(&self) -> &str {
    "operator"
  }

  async fn execute(&self, input: Value, _ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
    let selected = self.select(&input)?;
    debug!(node_id = %self.id, selected = ?selected, "choice_evaluated");

    let output: Map<String, Value> = self
      .options
      .iter()
      .map(|o| (o.id.clone(), Value::Bool(Some(o.id.as_str()) == selected)))
      .collect();
    Ok(Value::Object(output))
  }
}
