use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tessera_config::{Condition, ErrorHandlingDef, RetryBackoff, UpstreamPolicy};
use tracing::{instrument, warn};

use crate::events::ExecutionEvent;
use crate::input::{Transformer, validate_required};
use crate::node::{Node, NodeContext};
use crate::result::{ErrorKind, RunnableError, RunnableResult};

/// Gate on an upstream result, evaluated once the upstream is done.
#[derive(Debug, Clone, PartialEq)]
pub enum DependencyCondition {
  /// Any successful upstream satisfies the dependency.
  Always,
  /// The upstream is a choice node and `option` must be the selected branch.
  Option { option: String },
  /// The condition must hold for the upstream output.
  Matches(Condition),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
  pub node_id: String,
  pub condition: DependencyCondition,
}

impl Dependency {
  pub fn new(node_id: impl Into<String>) -> Self {
    Self {
      node_id: node_id.into(),
      condition: DependencyCondition::Always,
    }
  }

  pub fn option(node_id: impl Into<String>, option: impl Into<String>) -> Self {
    Self {
      node_id: node_id.into(),
      condition: DependencyCondition::Option {
        option: option.into(),
      },
    }
  }

  pub fn when(node_id: impl Into<String>, condition: Condition) -> Self {
    Self {
      node_id: node_id.into(),
      condition: DependencyCondition::Matches(condition),
    }
  }
}

/// Timeout and retry policy for a node body.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorHandling {
  pub timeout: Option<Duration>,
  pub max_retries: u32,
  pub retry_interval: Duration,
  pub backoff: RetryBackoff,
}

impl Default for ErrorHandling {
  fn default() -> Self {
    Self {
      timeout: None,
      max_retries: 0,
      retry_interval: Duration::from_millis(1000),
      backoff: RetryBackoff::Constant,
    }
  }
}

impl ErrorHandling {
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn with_retries(mut self, max_retries: u32, retry_interval: Duration) -> Self {
    self.max_retries = max_retries;
    self.retry_interval = retry_interval;
    self
  }

  pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
    self.backoff = backoff;
    self
  }

  /// Delay before retry number `attempt` (1-based).
  pub fn retry_delay(&self, attempt: u32) -> Duration {
    match self.backoff {
      RetryBackoff::Constant => self.retry_interval,
      RetryBackoff::Linear => self.retry_interval.saturating_mul(attempt.max(1)),
      RetryBackoff::Exponential => self
        .retry_interval
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1))),
    }
  }
}

impl From<&ErrorHandlingDef> for ErrorHandling {
  fn from(def: &ErrorHandlingDef) -> Self {
    let defaults = ErrorHandling::default();
    Self {
      timeout: def.timeout_ms.map(Duration::from_millis),
      max_retries: def.max_retries.unwrap_or(defaults.max_retries),
      retry_interval: def
        .retry_interval_ms
        .map(Duration::from_millis)
        .unwrap_or(defaults.retry_interval),
      backoff: def.backoff.unwrap_or(defaults.backoff),
    }
  }
}

/// A node placed in a flow: the node itself plus its structural policy.
pub struct FlowNode {
  node: Arc<dyn Node>,
  name: Option<String>,
  depends: Vec<Dependency>,
  error_handling: ErrorHandling,
  input_transformer: Option<Transformer>,
  output_transformer: Option<Transformer>,
  input_schema: Option<Value>,
  on_upstream_failure: UpstreamPolicy,
  fail_workflow: bool,
}

impl FlowNode {
  pub fn new(node: impl Node + 'static) -> Self {
    Self::from_arc(Arc::new(node))
  }

  pub fn from_arc(node: Arc<dyn Node>) -> Self {
    Self {
      node,
      name: None,
      depends: Vec::new(),
      error_handling: ErrorHandling::default(),
      input_transformer: None,
      output_transformer: None,
      input_schema: None,
      on_upstream_failure: UpstreamPolicy::default(),
      fail_workflow: true,
    }
  }

  /// Display name for traces, overriding the node's own.
  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  pub fn depends_on(mut self, node_id: impl Into<String>) -> Self {
    self.depends.push(Dependency::new(node_id));
    self
  }

  /// Depend on a choice node, running only if `option` was selected.
  pub fn depends_on_option(mut self, node_id: impl Into<String>, option: impl Into<String>) -> Self {
    self.depends.push(Dependency::option(node_id, option));
    self
  }

  pub fn depends_on_when(mut self, node_id: impl Into<String>, condition: Condition) -> Self {
    self.depends.push(Dependency::when(node_id, condition));
    self
  }

  pub fn with_dependency(mut self, dependency: Dependency) -> Self {
    self.depends.push(dependency);
    self
  }

  pub fn with_error_handling(mut self, error_handling: ErrorHandling) -> Self {
    self.error_handling = error_handling;
    self
  }

  pub fn with_input(mut self, transformer: Transformer) -> Self {
    self.input_transformer = Some(transformer);
    self
  }

  pub fn with_output(mut self, transformer: Transformer) -> Self {
    self.output_transformer = Some(transformer);
    self
  }

  /// Override the node's own input schema for coercion and validation.
  pub fn with_input_schema(mut self, schema: Value) -> Self {
    self.input_schema = Some(schema);
    self
  }

  pub fn on_upstream_failure(mut self, policy: UpstreamPolicy) -> Self {
    self.on_upstream_failure = policy;
    self
  }

  /// Run even when upstream nodes failed or were skipped.
  pub fn continue_on_failure(self) -> Self {
    self.on_upstream_failure(UpstreamPolicy::Continue)
  }

  /// A failure of this node does not fail the workflow.
  pub fn optional(mut self) -> Self {
    self.fail_workflow = false;
    self
  }

  pub fn id(&self) -> &str {
    self.node.id()
  }

  pub fn name(&self) -> &str {
    self.name.as_deref().unwrap_or_else(|| self.node.name())
  }

  pub fn node(&self) -> &Arc<dyn Node> {
    &self.node
  }

  pub fn depends(&self) -> &[Dependency] {
    &self.depends
  }

  pub fn error_handling(&self) -> &ErrorHandling {
    &self.error_handling
  }

  pub fn input_transformer(&self) -> Option<&Transformer> {
    self.input_transformer.as_ref()
  }

  pub fn input_schema(&self) -> Option<&Value> {
    self.input_schema.as_ref().or_else(|| self.node.input_schema())
  }

  pub fn upstream_policy(&self) -> UpstreamPolicy {
    self.on_upstream_failure
  }

  pub fn fail_workflow(&self) -> bool {
    self.fail_workflow
  }

  /// Run the node body under its error-handling policy.
  ///
  /// Never fails: errors, timeouts and cancellation become FAILURE results.
  #[instrument(name = "node_run", skip_all, fields(node_id = %self.id(), run_id = %ctx.run_id()))]
  pub async fn run(&self, input: Value, ctx: &NodeContext<'_>) -> RunnableResult {
    let config = ctx.config();
    config.emit(&ExecutionEvent::NodeStarted {
      run_id: ctx.run_id().to_string(),
      parent_run_id: ctx.parent_run_id().map(str::to_string),
      node_id: self.id().to_string(),
      name: self.name().to_string(),
      input: input.clone(),
    });

    let outcome = tokio::select! {
      outcome = self.invoke(&input, ctx) => outcome,
      _ = config.cancellation().cancelled() => Err(RunnableError::new(
        ErrorKind::Cancelled,
        format!("node '{}' cancelled", self.id()),
      )),
    };

    let outcome = outcome.and_then(|output| match &self.output_transformer {
      Some(transformer) => transformer
        .apply(self.id(), &output, None)
        .map_err(RunnableError::from),
      None => Ok(output),
    });

    match outcome {
      Ok(output) => {
        config.emit(&ExecutionEvent::NodeCompleted {
          run_id: ctx.run_id().to_string(),
          parent_run_id: ctx.parent_run_id().map(str::to_string),
          node_id: self.id().to_string(),
          output: output.clone(),
        });
        RunnableResult::success(input, output)
      }
      Err(error) => {
        config.emit(&ExecutionEvent::NodeFailed {
          run_id: ctx.run_id().to_string(),
          parent_run_id: ctx.parent_run_id().map(str::to_string),
          node_id: self.id().to_string(),
          error: error.clone(),
        });
        RunnableResult::failure(input, error)
      }
    }
  }

  async fn invoke(&self, input: &Value, ctx: &NodeContext<'_>) -> Result<Value, RunnableError> {
    if let Some(schema) = self.input_schema() {
      validate_required(self.id(), schema, input)?;
    }

    let mut attempt = 0;
    loop {
      let error = match self.attempt(input, ctx).await {
        Ok(output) => return Ok(output),
        Err(error) => error,
      };

      attempt += 1;
      if attempt > self.error_handling.max_retries || error.kind == ErrorKind::InvalidInput {
        return Err(error);
      }

      let delay = self.error_handling.retry_delay(attempt);
      warn!(
        node_id = %self.id(),
        attempt = attempt,
        delay_ms = delay.as_millis() as u64,
        error = %error,
        "node_retrying"
      );
      tokio::time::sleep(delay).await;
    }
  }

  async fn attempt(&self, input: &Value, ctx: &NodeContext<'_>) -> Result<Value, RunnableError> {
    match self.error_handling.timeout {
      Some(timeout) => match tokio::time::timeout(timeout, self.node.execute(input.clone(), ctx)).await {
        Ok(result) => result.map_err(RunnableError::from),
        Err(_) => Err(RunnableError::new(
          ErrorKind::Timeout,
          format!(
            "node '{}' timed out after {}ms",
            self.id(),
            timeout.as_millis()
          ),
        )),
      },
      None => self
        .node
        .execute(input.clone(), ctx)
        .await
        .map_err(RunnableError::from),
    }
  }
}

impl std::fmt::Debug for FlowNode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FlowNode")
      .field("id", &self.id())
      .field("depends", &self.depends)
      .field("error_handling", &self.error_handling)
      .field("on_upstream_failure", &self.on_upstream_failure)
      .field("fail_workflow", &self.fail_workflow)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  use async_trait::async_trait;
  use serde_json::json;

  use crate::config::RunnableConfig;
  use crate::connections::ConnectionRegistry;
  use crate::error::NodeError;
  use crate::events::ChannelHandler;

  /// Fails until it has been called `succeed_on` times.
  struct Flaky {
    calls: AtomicU32,
    succeed_on: u32,
  }

  #[async_trait]
  impl Node for Flaky {
    fn id(&self) -> &str {
      "flaky"
    }

    async fn execute(&self, _input: Value, _ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
      let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
      if call >= self.succeed_on {
        Ok(json!({"call": call}))
      } else {
        Err(NodeError::execution(format!("call {} failed", call)))
      }
    }
  }

  struct Slow;

  #[async_trait]
  impl Node for Slow {
    fn id(&self) -> &str {
      "slow"
    }

    async fn execute(&self, _input: Value, _ctx: &NodeContext<'_>) -> Result<Value, NodeError> {
      tokio::time::sleep(Duration::from_secs(5)).await;
      Ok(Value::Null)
    }
  }

  fn flaky(succeed_on: u32) -> Flaky {
    Flaky {
      calls: AtomicU32::new(0),
      succeed_on,
    }
  }

  #[test]
  fn test_retry_delay_backoff() {
    let base = ErrorHandling::default().with_retries(3, Duration::from_millis(100));
    assert_eq!(base.retry_delay(3), Duration::from_millis(100));

    let linear = base.clone().with_backoff(RetryBackoff::Linear);
    assert_eq!(linear.retry_delay(3), Duration::from_millis(300));

    let exponential = base.with_backoff(RetryBackoff::Exponential);
    assert_eq!(exponential.retry_delay(1), Duration::from_millis(100));
    assert_eq!(exponential.retry_delay(3), Duration::from_millis(400));
  }

  #[test]
  fn test_error_handling_from_def() {
    let def = ErrorHandlingDef {
      timeout_ms: Some(250),
      max_retries: Some(2),
      retry_interval_ms: None,
      backoff: None,
    };
    let handling = ErrorHandling::from(&def);
    assert_eq!(handling.timeout, Some(Duration::from_millis(250)));
    assert_eq!(handling.max_retries, 2);
    assert_eq!(handling.retry_interval, Duration::from_millis(1000));
  }

  #[tokio::test]
  async fn test_retries_until_success() {
    let node = FlowNode::new(flaky(3))
      .with_error_handling(ErrorHandling::default().with_retries(2, Duration::from_millis(1)));
    let config = RunnableConfig::new();
    let connections = ConnectionRegistry::new();
    let ctx = NodeContext::new("run", "flaky", &config, &connections);

    let result = node.run(json!({}), &ctx).await;
    assert!(result.is_success());
    assert_eq!(result.output, json!({"call": 3}));
  }

  #[tokio::test]
  async fn test_retries_exhausted() {
    let node = FlowNode::new(flaky(5))
      .with_error_handling(ErrorHandling::default().with_retries(1, Duration::from_millis(1)));
    let config = RunnableConfig::new();
    let connections = ConnectionRegistry::new();
    let ctx = NodeContext::new("run", "flaky", &config, &connections);

    let result = node.run(json!({}), &ctx).await;
    assert!(result.is_failure());
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Execution);
    assert_eq!(error.message, "call 2 failed");
  }

  #[tokio::test]
  async fn test_timeout_becomes_failure() {
    let node = FlowNode::new(Slow)
      .with_error_handling(ErrorHandling::default().with_timeout(Duration::from_millis(20)));
    let config = RunnableConfig::new();
    let connections = ConnectionRegistry::new();
    let ctx = NodeContext::new("run", "slow", &config, &connections);

    let result = node.run(json!({"q": 1}), &ctx).await;
    assert!(result.is_failure());
    assert_eq!(result.input, json!({"q": 1}));
    assert_eq!(result.error.unwrap().kind, ErrorKind::Timeout);
  }

  #[tokio::test]
  async fn test_missing_required_input_is_not_retried() {
    let node = FlowNode::new(flaky(1))
      .with_input_schema(json!({"required": ["query"]}))
      .with_error_handling(ErrorHandling::default().with_retries(3, Duration::from_millis(1)));
    let config = RunnableConfig::new();
    let connections = ConnectionRegistry::new();
    let ctx = NodeContext::new("run", "flaky", &config, &connections);

    let result = node.run(json!({}), &ctx).await;
    assert_eq!(result.error.unwrap().kind, ErrorKind::InvalidInput);
  }

  #[tokio::test]
  async fn test_output_transformer_and_events() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let config = RunnableConfig::new().with_callback(Arc::new(ChannelHandler::new(tx)));
    let connections = ConnectionRegistry::new();
    let ctx = NodeContext::new("run-1", "flaky", &config, &connections)
      .with_parent_run_id(Some("wf-run"));

    let node = FlowNode::new(flaky(1)).with_output(Transformer::new().field("n", "$.call"));
    let result = node.run(json!({}), &ctx).await;
    assert_eq!(result.output, json!({"n": 1}));

    match rx.try_recv().unwrap() {
      ExecutionEvent::NodeStarted {
        run_id,
        parent_run_id,
        ..
      } => {
        assert_eq!(run_id, "run-1");
        assert_eq!(parent_run_id.as_deref(), Some("wf-run"));
      }
      other => panic!("expected NodeStarted, got {:?}", other),
    }
    assert!(matches!(
      rx.try_recv().unwrap(),
      ExecutionEvent::NodeCompleted { .. }
    ));
  }

  #[tokio::test]
  async fn test_cancellation_interrupts_body() {
    let config = RunnableConfig::new();
    config.cancellation().cancel();
    let connections = ConnectionRegistry::new();
    let ctx = NodeContext::new("run", "slow", &config, &connections);

    let result = FlowNode::new(Slow).run(Value::Null, &ctx).await;
    assert_eq!(result.error.unwrap().kind, ErrorKind::Cancelled);
  }
}
