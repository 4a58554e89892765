//! Built-in nodes.
//!
//! - [`FunctionTool`]: wraps a Rust closure as a tool with an explicit schema.
//! - [`Choice`]: selects the first matching branch; dependents gate on it with
//!   [`FlowNode::depends_on_option`](tessera_runtime::FlowNode::depends_on_option).
//! - [`Map`]: runs an inner node over every item of a list.
//! - [`Template`] and [`Pass`]: small data-shaping operators.

mod choice;
mod error;
mod function_tool;
mod map;
mod pass;
mod template;

pub use choice::{Choice, ChoiceOption};
pub use error::BuildError;
pub use function_tool::{FunctionTool, FunctionToolBuilder};
pub use map::{DEFAULT_MAP_CONCURRENCY, Map};
pub use pass::Pass;
pub use template::Template;
