use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::events::{CallbackHandler, ExecutionEvent};

/// Per-invocation configuration passed by reference through a run.
///
/// Cloning is cheap: handlers and the cancellation token are shared.
#[derive(Clone)]
pub struct RunnableConfig {
  callbacks: Vec<Arc<dyn CallbackHandler>>,
  cancel: CancellationToken,
  timeout: Option<Duration>,
}

impl RunnableConfig {
  pub fn new() -> Self {
    Self {
      callbacks: Vec::new(),
      cancel: CancellationToken::new(),
      timeout: None,
    }
  }

  /// Append a callback handler. Handlers are notified in insertion order.
  pub fn with_callback(mut self, handler: Arc<dyn CallbackHandler>) -> Self {
    self.callbacks.push(handler);
    self
  }

  /// Use an externally owned cancellation token.
  pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  /// Bound the whole run. Nodes still running at the deadline fail.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn callbacks(&self) -> &[Arc<dyn CallbackHandler>] {
    &self.callbacks
  }

  pub fn cancellation(&self) -> &CancellationToken {
    &self.cancel
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.timeout
  }

  pub(crate) fn emit(&self, event: &ExecutionEvent) {
    for handler in &self.callbacks {
      handler.notify(event);
    }
  }
}

impl Default for RunnableConfig {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Debug for RunnableConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RunnableConfig")
      .field("callbacks", &self.callbacks.len())
      .field("cancelled", &self.cancel.is_cancelled())
      .field("timeout", &self.timeout)
      .finish()
  }
}
