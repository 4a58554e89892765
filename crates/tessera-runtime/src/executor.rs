//! Pooled node execution.
//!
//! The [`PoolExecutor`] accepts batches of ready nodes, runs them on a bounded
//! pool and hands back results as they complete. Two strategies are available:
//!
//! - [`ExecutorKind::Thread`]: async workers on the tokio runtime, for nodes
//!   that mostly wait on I/O.
//! - [`ExecutorKind::Blocking`]: each node body runs on a dedicated blocking
//!   thread, for CPU-bound nodes that would otherwise stall the runtime.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tessera_config::{ExecutorDef, ExecutorKind};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error};

use crate::config::RunnableConfig;
use crate::connections::ConnectionRegistry;
use crate::error::ExecutorError;
use crate::node::NodeContext;
use crate::resolver::NodeReadyToRun;
use crate::result::{ErrorKind, RunnableError, RunnableResult};

/// Default worker count for the thread strategy.
pub const DEFAULT_THREAD_WORKERS: usize = 8;

/// Everything a worker needs besides the node itself.
#[derive(Debug, Clone, Default)]
pub struct FlowContext {
  config: RunnableConfig,
  connections: Arc<ConnectionRegistry>,
  parent_run_id: Option<String>,
}

impl FlowContext {
  pub fn new(config: RunnableConfig) -> Self {
    Self {
      config,
      connections: Arc::new(ConnectionRegistry::new()),
      parent_run_id: None,
    }
  }

  pub fn with_connections(mut self, connections: Arc<ConnectionRegistry>) -> Self {
    self.connections = connections;
    self
  }

  pub fn with_config(mut self, config: RunnableConfig) -> Self {
    self.config = config;
    self
  }

  pub fn with_parent_run_id(mut self, parent_run_id: impl Into<String>) -> Self {
    self.parent_run_id = Some(parent_run_id.into());
    self
  }

  pub fn config(&self) -> &RunnableConfig {
    &self.config
  }

  pub fn connections(&self) -> &Arc<ConnectionRegistry> {
    &self.connections
  }

  pub fn parent_run_id(&self) -> Option<&str> {
    self.parent_run_id.as_deref()
  }
}

/// Pool sizing and strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorConfig {
  pub kind: ExecutorKind,
  pub max_workers: Option<usize>,
}

impl ExecutorConfig {
  pub fn thread(max_workers: usize) -> Self {
    Self {
      kind: ExecutorKind::Thread,
      max_workers: Some(max_workers),
    }
  }

  pub fn blocking(max_workers: usize) -> Self {
    Self {
      kind: ExecutorKind::Blocking,
      max_workers: Some(max_workers),
    }
  }

  /// Worker count, falling back to the strategy default.
  pub fn workers(&self) -> usize {
    let default = match self.kind {
      ExecutorKind::Thread => DEFAULT_THREAD_WORKERS,
      ExecutorKind::Blocking => std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1),
    };
    self.max_workers.unwrap_or(default).max(1)
  }
}

impl From<&ExecutorDef> for ExecutorConfig {
  fn from(def: &ExecutorDef) -> Self {
    Self {
      kind: def.kind,
      max_workers: def.max_workers,
    }
  }
}

/// Runs ready nodes and reports completions.
#[async_trait]
pub trait Executor: Send {
  /// Maximum number of node bodies running at once.
  fn max_workers(&self) -> usize;

  /// Submitted nodes whose result has not been returned yet.
  fn in_flight(&self) -> usize;

  /// Submit every ready node, then wait until at least one submitted node
  /// completes and return all completions available at that moment.
  ///
  /// Returns an empty map when nothing is in flight.
  async fn execute(
    &mut self,
    ready: Vec<NodeReadyToRun>,
    ctx: &FlowContext,
  ) -> Result<HashMap<String, RunnableResult>, ExecutorError>;

  /// Stop the pool. With `wait`, outstanding nodes run to completion and their
  /// results are returned; otherwise they are aborted and dropped.
  async fn shutdown(&mut self, wait: bool) -> Result<HashMap<String, RunnableResult>, ExecutorError>;
}

/// Bounded worker pool over a tokio [`JoinSet`].
pub struct PoolExecutor {
  kind: ExecutorKind,
  max_workers: usize,
  semaphore: Arc<Semaphore>,
  tasks: JoinSet<(String, RunnableResult)>,
  running: HashSet<String>,
}

impl PoolExecutor {
  pub fn new(config: ExecutorConfig) -> Self {
    let max_workers = config.workers();
    Self {
      kind: config.kind,
      max_workers,
      semaphore: Arc::new(Semaphore::new(max_workers)),
      tasks: JoinSet::new(),
      running: HashSet::new(),
    }
  }

  pub fn kind(&self) -> ExecutorKind {
    self.kind
  }

  fn submit(&mut self, ready: NodeReadyToRun, ctx: &FlowContext) {
    let node_id = ready.node_id().to_string();
    let semaphore = self.semaphore.clone();
    let kind = self.kind;
    let ctx = ctx.clone();

    debug!(node_id = %node_id, kind = ?kind, "node_submitted");
    self.running.insert(node_id.clone());

    self.tasks.spawn(async move {
      // Semaphore is never closed
      let _permit = semaphore.acquire_owned().await.ok();
      let input = ready.input.clone();

      let result = match kind {
        ExecutorKind::Thread => run_guarded(ready, ctx).await,
        ExecutorKind::Blocking => {
          let handle = tokio::runtime::Handle::current();
          tokio::task::spawn_blocking(move || handle.block_on(run_guarded(ready, ctx)))
            .await
            .unwrap_or_else(|e| {
              RunnableResult::failure(input, RunnableError::new(ErrorKind::Panicked, e.to_string()))
            })
        }
      };

      (node_id, result)
    });
  }

  fn collect(
    &mut self,
    joined: Result<(String, RunnableResult), JoinError>,
    completed: &mut HashMap<String, RunnableResult>,
  ) -> Result<(), ExecutorError> {
    let (node_id, result) = joined.map_err(|e| ExecutorError::WorkerCancelled {
      message: e.to_string(),
    })?;

    if !self.running.remove(&node_id) {
      return Err(ExecutorError::UnknownTask { node_id });
    }

    debug!(node_id = %node_id, status = %result.status, "node_collected");
    completed.insert(node_id, result);
    Ok(())
  }
}

#[async_trait]
impl Executor for PoolExecutor {
  fn max_workers(&self) -> usize {
    self.max_workers
  }

  fn in_flight(&self) -> usize {
    self.running.len()
  }

  async fn execute(
    &mut self,
    ready: Vec<NodeReadyToRun>,
    ctx: &FlowContext,
  ) -> Result<HashMap<String, RunnableResult>, ExecutorError> {
    for node in ready {
      if !node.is_ready() {
        error!(node_id = %node.node_id(), "node_not_ready");
        continue;
      }
      self.submit(node, ctx);
    }

    let mut completed = HashMap::new();

    let Some(joined) = self.tasks.join_next().await else {
      return Ok(completed);
    };
    self.collect(joined, &mut completed)?;

    while let Some(joined) = self.tasks.try_join_next() {
      self.collect(joined, &mut completed)?;
    }

    Ok(completed)
  }

  async fn shutdown(&mut self, wait: bool) -> Result<HashMap<String, RunnableResult>, ExecutorError> {
    let mut completed = HashMap::new();

    if wait {
      while let Some(joined) = self.tasks.join_next().await {
        self.collect(joined, &mut completed)?;
      }
    } else {
      self.tasks.abort_all();
      while self.tasks.join_next().await.is_some() {}
      self.running.clear();
    }

    Ok(completed)
  }
}

impl std::fmt::Debug for PoolExecutor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PoolExecutor")
      .field("kind", &self.kind)
      .field("max_workers", &self.max_workers)
      .field("in_flight", &self.running.len())
      .finish()
  }
}

/// Run a node, turning a panic in its body into a FAILURE result.
async fn run_guarded(ready: NodeReadyToRun, ctx: FlowContext) -> RunnableResult {
  let input = ready.input.clone();
  match AssertUnwindSafe(run_node(ready, &ctx)).catch_unwind().await {
    Ok(result) => result,
    Err(panic) => RunnableResult::failure(
      input,
      RunnableError::new(ErrorKind::Panicked, panic_message(panic.as_ref())),
    ),
  }
}

async fn run_node(ready: NodeReadyToRun, ctx: &FlowContext) -> RunnableResult {
  let run_id = uuid::Uuid::new_v4().to_string();
  let node_ctx = NodeContext::new(&run_id, ready.node.id(), ctx.config(), ctx.connections())
    .with_parent_run_id(ctx.parent_run_id());
  ready.node.run(ready.input, &node_ctx).await
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
  if let Some(message) = panic.downcast_ref::<&str>() {
    format!("node panicked: {}", message)
  } else if let Some(message) = panic.downcast_ref::<String>() {
    format!("node panicked: {}", message)
  } else {
    "node panicked".to_string()
  }
}
