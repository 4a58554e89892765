use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{error, info, instrument};

use crate::config::RunnableConfig;
use crate::connections::ConnectionRegistry;
use crate::error::FlowError;
use crate::events::ExecutionEvent;
use crate::executor::FlowContext;
use crate::flow::Flow;
use crate::flow_node::FlowNode;
use crate::result::RunnableResult;

/// A runnable workflow: a flow plus the connections its nodes use.
#[derive(Debug)]
pub struct Workflow {
  id: String,
  name: String,
  flow: Flow,
  connections: Arc<ConnectionRegistry>,
  timeout: Option<Duration>,
}

impl Workflow {
  pub fn new(flow: Flow) -> Self {
    Self {
      id: flow.id().to_string(),
      name: flow.id().to_string(),
      flow,
      connections: Arc::new(ConnectionRegistry::new()),
      timeout: None,
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn with_connections(mut self, connections: ConnectionRegistry) -> Self {
    self.connections = Arc::new(connections);
    self
  }

  /// Default run timeout, used when the run config sets none.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.timeout
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn flow(&self) -> &Flow {
    &self.flow
  }

  pub fn nodes(&self) -> &[Arc<FlowNode>] {
    self.flow.nodes()
  }

  pub fn get_node(&self, node_id: &str) -> Option<&Arc<FlowNode>> {
    self.flow.get_node(node_id)
  }

  pub fn connections(&self) -> &ConnectionRegistry {
    &self.connections
  }

  /// Run the workflow.
  ///
  /// Node failures are reported in the returned result; `Err` is reserved for
  /// structural defects such as a deadlocked graph.
  #[instrument(name = "workflow_run", skip(self, input, config), fields(workflow_id = %self.id))]
  pub async fn run(
    &self,
    input: Value,
    config: &RunnableConfig,
  ) -> Result<RunnableResult, FlowError> {
    let run_id = uuid::Uuid::new_v4().to_string();

    info!(run_id = %run_id, workflow_id = %self.id, "workflow_started");
    config.emit(&ExecutionEvent::WorkflowStarted {
      run_id: run_id.clone(),
      workflow_id: self.id.clone(),
      input: input.clone(),
    });

    let run_config = match (config.timeout(), self.timeout) {
      (None, Some(timeout)) => config.clone().with_timeout(timeout),
      _ => config.clone(),
    };
    let ctx = FlowContext::new(run_config)
      .with_connections(self.connections.clone())
      .with_parent_run_id(run_id.clone());

    match self.flow.run(input, &ctx).await {
      Ok(result) => {
        match &result.error {
          None => {
            info!(run_id = %run_id, "workflow_completed");
            config.emit(&ExecutionEvent::WorkflowCompleted {
              run_id,
              workflow_id: self.id.clone(),
              output: result.output.clone(),
            });
          }
          Some(err) => {
            error!(run_id = %run_id, error = %err, "workflow_failed");
            config.emit(&ExecutionEvent::WorkflowFailed {
              run_id,
              workflow_id: self.id.clone(),
              output: result.output.clone(),
              error: err.message.clone(),
            });
          }
        }
        Ok(result)
      }
      Err(err) => {
        error!(run_id = %run_id, error = %err, "workflow_failed");
        config.emit(&ExecutionEvent::WorkflowFailed {
          run_id,
          workflow_id: self.id.clone(),
          output: Value::Null,
          error: err.to_string(),
        });
        Err(err)
      }
    }
  }
}
