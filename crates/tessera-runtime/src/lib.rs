//! Tessera Runtime
//!
//! The workflow execution core. A [`Workflow`] wraps a validated [`Flow`] of
//! [`FlowNode`]s; running it drives a scheduler loop that asks the
//! [`DependencyResolver`] for ready nodes, dispatches them to a bounded
//! [`PoolExecutor`], and merges results until every node is done.
//!
//! ```text
//! Workflow::run ──► Flow::run ──► DependencyResolver::get_ready_nodes
//!                       ▲                    │
//!                       │                    ▼
//!                  FlowState ◄── PoolExecutor::execute (≥1 completion)
//! ```
//!
//! Node failures are values ([`RunnableResult`] with FAILURE status), never
//! panics across the pool boundary. Observers subscribe through
//! [`CallbackHandler`]s on the [`RunnableConfig`].

mod condition;
mod config;
mod connections;
mod error;
mod events;
mod executor;
mod flow;
mod flow_node;
mod input;
mod node;
mod resolver;
mod result;
mod trace;
mod workflow;

pub use condition::evaluate_condition;
pub use config::RunnableConfig;
pub use connections::ConnectionRegistry;
pub use error::{ExecutorError, FlowError, NodeError};
pub use events::{CallbackHandler, ChannelHandler, ExecutionEvent, LoggingHandler, NoopHandler};
pub use executor::{DEFAULT_THREAD_WORKERS, Executor, ExecutorConfig, FlowContext, PoolExecutor};
pub use flow::Flow;
pub use flow_node::{Dependency, DependencyCondition, ErrorHandling, FlowNode};
pub use input::{
  SchemaType, Transformer, build_context, extract_schema_types, select_path, validate_required,
};
pub use node::{Node, NodeContext};
pub use resolver::{DependencyResolver, FlowState, NodeReadyToRun, NodeState, Readiness};
pub use result::{ErrorKind, RunnableError, RunnableResult, RunnableStatus};
pub use trace::{Run, RunKind, RunStatus, TraceExport, TracingCallbackHandler};
pub use workflow::Workflow;

pub use tessera_config::{ExecutorKind, RetryBackoff, UpstreamPolicy};
pub use tessera_workflow::WorkflowError;
