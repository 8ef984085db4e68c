//! Tool system for function calling.

pub mod arguments;
pub mod tool;
pub mod types;
pub mod validation;

pub use arguments::ToolArguments;
pub use tool::{FnTool, Tool, ToolError, ToolExecutionContext};
pub use types::{ParameterBuilder, ToolParameters};
