//! Tessera Workflow
//!
//! Structural view of a workflow: the dependency graph between node ids,
//! validated once at construction (no duplicate ids, no unknown dependencies,
//! no cycles) and queried by the scheduler.

mod error;
mod graph;

pub use error::WorkflowError;
pub use graph::Graph;
