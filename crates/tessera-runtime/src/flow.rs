use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tessera_workflow::{Graph, WorkflowError};
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::error::{ExecutorError, FlowError};
use crate::events::ExecutionEvent;
use crate::executor::{Executor, ExecutorConfig, FlowContext, PoolExecutor};
use crate::flow_node::FlowNode;
use crate::resolver::{DependencyResolver, FlowState, NodeReadyToRun, NodeState, Readiness};
use crate::result::{ErrorKind, RunnableError, RunnableResult, RunnableStatus};

/// A validated dependency graph of nodes.
///
/// A flow is immutable; each call to [`run`](Self::run) keeps its own
/// [`FlowState`], so one flow can serve concurrent runs.
#[derive(Debug)]
pub struct Flow {
  id: String,
  nodes: Vec<Arc<FlowNode>>,
  graph: Graph,
  executor: ExecutorConfig,
  resolver: DependencyResolver,
}

enum Step {
  Completed(Result<HashMap<String, RunnableResult>, ExecutorError>),
  Cancelled,
  TimedOut,
}

impl Flow {
  /// Build a flow, rejecting duplicate ids, unknown dependencies and cycles.
  pub fn new(id: impl Into<String>, nodes: Vec<FlowNode>) -> Result<Self, WorkflowError> {
    let nodes: Vec<Arc<FlowNode>> = nodes.into_iter().map(Arc::new).collect();
    let ids: Vec<String> = nodes.iter().map(|n| n.id().to_string()).collect();
    let edges: Vec<(String, String)> = nodes
      .iter()
      .flat_map(|n| {
        n.depends()
          .iter()
          .map(|d| (d.node_id.clone(), n.id().to_string()))
      })
      .collect();

    let graph = Graph::new(&ids, &edges)?;

    Ok(Self {
      id: id.into(),
      nodes,
      graph,
      executor: ExecutorConfig::default(),
      resolver: DependencyResolver::new(),
    })
  }

  pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
    self.executor = executor;
    self
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn nodes(&self) -> &[Arc<FlowNode>] {
    &self.nodes
  }

  pub fn get_node(&self, node_id: &str) -> Option<&Arc<FlowNode>> {
    self.nodes.iter().find(|n| n.id() == node_id)
  }

  pub fn graph(&self) -> &Graph {
    &self.graph
  }

  pub fn executor_config(&self) -> ExecutorConfig {
    self.executor
  }

  /// Run the flow on a fresh pool built from its executor config.
  pub async fn run(&self, input: Value, ctx: &FlowContext) -> Result<RunnableResult, FlowError> {
    let mut executor = PoolExecutor::new(self.executor);
    let result = self.run_with(input, ctx, &mut executor).await;
    // Nothing is outstanding on success; on error drop whatever is left.
    executor.shutdown(result.is_ok()).await?;
    result
  }

  /// Run the flow on the given executor.
  #[instrument(name = "flow_run", skip_all, fields(flow_id = %self.id))]
  pub async fn run_with(
    &self,
    input: Value,
    ctx: &FlowContext,
    executor: &mut dyn Executor,
  ) -> Result<RunnableResult, FlowError> {
    let parent = ctx.config();
    let run_config = parent
      .clone()
      .with_cancellation(parent.cancellation().child_token());
    let cancel = run_config.cancellation().clone();
    let ctx = ctx.clone().with_config(run_config);
    let deadline = ctx.config().timeout().map(|t| Instant::now() + t);

    let mut state = FlowState::new(&self.nodes, input.clone());

    info!(
      flow_id = %self.id,
      nodes = self.nodes.len(),
      max_workers = executor.max_workers(),
      "flow_started"
    );

    let interrupted = loop {
      let runnable = self.settle_ready(&mut state, &ctx);

      if state.is_finished() {
        break None;
      }

      if runnable.is_empty() && executor.in_flight() == 0 {
        let mut pending = state.ids_in(NodeState::Pending);
        pending.extend(state.ids_in(NodeState::Running));
        warn!(flow_id = %self.id, pending = ?pending, "flow_deadlocked");
        return Err(FlowError::Deadlock { pending });
      }

      for ready in &runnable {
        state.set_state(ready.node_id(), NodeState::Running);
      }

      // Interruptions win over completions that arrive in the same poll.
      let step = tokio::select! {
        biased;
        _ = cancel.cancelled() => Step::Cancelled,
        _ = sleep_until(deadline) => Step::TimedOut,
        completed = executor.execute(runnable, &ctx) => Step::Completed(completed),
      };

      match step {
        Step::Completed(completed) => {
          for (node_id, result) in completed? {
            state.complete(&node_id, result);
          }
        }
        Step::Cancelled => {
          break Some(RunnableError::new(ErrorKind::Cancelled, "flow cancelled"));
        }
        Step::TimedOut => {
          cancel.cancel();
          break Some(RunnableError::new(ErrorKind::Timeout, "flow timed out"));
        }
      }
    };

    if let Some(error) = &interrupted {
      warn!(flow_id = %self.id, error = %error, "flow_interrupted");
      executor.shutdown(false).await?;
      self.abandon(&mut state, &ctx, error);
    }

    Ok(self.finish(input, state, interrupted))
  }

  /// Record nodes that will not run until none are left, and return the
  /// nodes to dispatch.
  fn settle_ready(&self, state: &mut FlowState, ctx: &FlowContext) -> Vec<NodeReadyToRun> {
    loop {
      let (runnable, settled): (Vec<_>, Vec<_>) = self
        .resolver
        .get_ready_nodes(&self.nodes, state)
        .into_iter()
        .partition(|r| r.is_ready());

      if settled.is_empty() {
        for ready in &runnable {
          state.set_state(ready.node_id(), NodeState::Ready);
        }
        return runnable;
      }

      for ready in settled {
        if let Some(result) = ready.settled_result() {
          self.emit_settled(ctx, &ready, &result);
          state.complete(ready.node_id(), result);
        }
      }
    }
  }

  fn emit_settled(&self, ctx: &FlowContext, ready: &NodeReadyToRun, result: &RunnableResult) {
    let run_id = uuid::Uuid::new_v4().to_string();
    let parent_run_id = ctx.parent_run_id().map(str::to_string);
    let node_id = ready.node_id().to_string();

    let event = match &ready.readiness {
      Readiness::Skip { reason } => ExecutionEvent::NodeSkipped {
        run_id,
        parent_run_id,
        node_id,
        name: ready.node.name().to_string(),
        input: result.input.clone(),
        reason: reason.clone(),
      },
      Readiness::Fail { error } => ExecutionEvent::NodeFailed {
        run_id,
        parent_run_id,
        node_id,
        error: error.clone(),
      },
      Readiness::Ready => return,
    };
    ctx.config().emit(&event);
  }

  /// After an interruption: running nodes fail, pending nodes are skipped.
  fn abandon(&self, state: &mut FlowState, ctx: &FlowContext, error: &RunnableError) {
    for node in &self.nodes {
      let node_id = node.id();
      let result = match state.state(node_id) {
        Some(NodeState::Running) | Some(NodeState::Ready) => {
          let result = RunnableResult::failure(Value::Null, error.clone());
          ctx.config().emit(&ExecutionEvent::NodeFailed {
            run_id: uuid::Uuid::new_v4().to_string(),
            parent_run_id: ctx.parent_run_id().map(str::to_string),
            node_id: node_id.to_string(),
            error: error.clone(),
          });
          result
        }
        Some(NodeState::Pending) => {
          let reason = error.message.clone();
          ctx.config().emit(&ExecutionEvent::NodeSkipped {
            run_id: uuid::Uuid::new_v4().to_string(),
            parent_run_id: ctx.parent_run_id().map(str::to_string),
            node_id: node_id.to_string(),
            name: node.name().to_string(),
            input: Value::Null,
            reason: reason.clone(),
          });
          RunnableResult::skip(Value::Null, reason)
        }
        _ => continue,
      };
      state.complete(node_id, result);
    }
  }

  fn finish(
    &self,
    input: Value,
    state: FlowState,
    interrupted: Option<RunnableError>,
  ) -> RunnableResult {
    let results = state.into_results();

    let mut failed: Vec<&str> = self
      .nodes
      .iter()
      .filter(|n| n.fail_workflow())
      .filter(|n| results.get(n.id()).is_some_and(|r| r.is_failure()))
      .map(|n| n.id())
      .collect();
    failed.sort_unstable();

    let output: BTreeMap<String, Value> = results
      .iter()
      .map(|(id, r)| (id.clone(), r.to_value()))
      .collect();

    let error = match interrupted {
      Some(error) => Some(error),
      None if !failed.is_empty() => Some(RunnableError::new(
        ErrorKind::Execution,
        format!("nodes failed: {}", failed.join(", ")),
      )),
      None => None,
    };

    let status = if error.is_some() {
      RunnableStatus::Failure
    } else {
      RunnableStatus::Success
    };

    info!(flow_id = %self.id, status = %status, "flow_finished");

    RunnableResult {
      status,
      input,
      output: Value::Object(output.into_iter().collect()),
      error,
    }
  }
}

async fn sleep_until(deadline: Option<Instant>) {
  match deadline {
    Some(deadline) => tokio::time::sleep_until(deadline).await,
    None => std::future::pending().await,
  }
}
