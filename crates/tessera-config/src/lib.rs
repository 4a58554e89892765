//! Tessera Config
//!
//! This crate contains the serializable workflow configuration types for tessera.
//! These types represent workflow definitions before they are resolved into
//! runnable nodes by `tessera-resolver`.
//!
//! Configuration is loaded from JSON files (via the CLI) or built in code.

mod condition;
mod enums;
mod node;
mod workflow;

pub use condition::{ChoiceOptionDef, Condition};
pub use enums::{ConditionOperator, ExecutorKind, RetryBackoff, UpstreamPolicy};
pub use node::{DependencyDef, ErrorHandlingDef, NodeDef, NodeKind};
pub use workflow::{ExecutorDef, WorkflowDef};
