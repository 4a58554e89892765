use serde::{Deserialize, Serialize};

use crate::enums::ConditionOperator;

/// A predicate over a JSON value.
///
/// `variable` is a JSONPath expression (e.g. `$.order.total`) evaluated
/// against the data the condition is checked on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
  pub variable: String,
  pub operator: ConditionOperator,
  #[serde(default)]
  pub value: serde_json::Value,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub is_not: bool,
}

impl Condition {
  pub fn new(
    variable: impl Into<String>,
    operator: ConditionOperator,
    value: serde_json::Value,
  ) -> Self {
    Self {
      variable: variable.into(),
      operator,
      value,
      is_not: false,
    }
  }

  /// Invert the result of this condition.
  pub fn negate(mut self) -> Self {
    self.is_not = !self.is_not;
    self
  }
}

/// A branch of a choice node. An option without a condition is the default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceOptionDef {
  pub id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub condition: Option<Condition>,
}
