use serde_json::Value;
use tessera_config::{Condition, ConditionOperator};

use crate::error::NodeError;
use crate::input::select_path;

/// Evaluate `condition` against `data`.
///
/// Type mismatches (a numeric operator on a string, etc.) evaluate to false.
/// Only an invalid path is an error.
pub fn evaluate_condition(condition: &Condition, data: &Value) -> Result<bool, NodeError> {
  let actual = select_path(data, &condition.variable).map_err(NodeError::invalid_input)?;
  let expected = &condition.value;

  let matched = match condition.operator {
    ConditionOperator::BooleanEquals => actual.as_bool().is_some() && actual.as_bool() == expected.as_bool(),
    ConditionOperator::NumericEquals => compare(&actual, expected, |a, b| a == b),
    ConditionOperator::NumericGreaterThan => compare(&actual, expected, |a, b| a > b),
    ConditionOperator::NumericGreaterThanOrEquals => compare(&actual, expected, |a, b| a >= b),
    ConditionOperator::NumericLessThan => compare(&actual, expected, |a, b| a < b),
    ConditionOperator::NumericLessThanOrEquals => compare(&actual, expected, |a, b| a <= b),
    ConditionOperator::StringEquals => strings(&actual, expected, |a, b| a == b),
    ConditionOperator::StringStartsWith => strings(&actual, expected, |a, b| a.starts_with(b)),
    ConditionOperator::StringEndsWith => strings(&actual, expected, |a, b| a.ends_with(b)),
    ConditionOperator::StringContains => strings(&actual, expected, |a, b| a.contains(b)),
    ConditionOperator::IsPresent => !actual.is_null(),
    ConditionOperator::IsNull => actual.is_null(),
  };

  Ok(matched != condition.is_not)
}

fn compare(actual: &Value, expected: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
  match (actual.as_f64(), expected.as_f64()) {
    (Some(a), Some(b)) => op(a, b),
    _ => false,
  }
}

fn strings(actual: &Value, expected: &Value, op: impl Fn(&str, &str) -> bool) -> bool {
  match (actual.as_str(), expected.as_str()) {
    (Some(a), Some(b)) => op(a, b),
    _ => false,
  }
}
