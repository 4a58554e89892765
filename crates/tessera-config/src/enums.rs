use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
  #[default]
  Constant,
  Linear,
  Exponential,
}

/// How a node reacts when one of its upstream nodes did not succeed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamPolicy {
  /// Record the node as skipped without running it.
  #[default]
  Skip,
  /// Record the node as failed without running it.
  Fail,
  /// Run the node anyway; the failed upstream output is null.
  Continue,
}

/// Worker strategy for the pool executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
  /// Async worker pool, suited for I/O-bound nodes.
  #[default]
  Thread,
  /// Dedicated blocking threads, suited for CPU-bound nodes.
  Blocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
  BooleanEquals,
  NumericEquals,
  NumericGreaterThan,
  NumericGreaterThanOrEquals,
  NumericLessThan,
  NumericLessThanOrEquals,
  StringEquals,
  StringStartsWith,
  StringEndsWith,
  StringContains,
  IsPresent,
  IsNull,
}
