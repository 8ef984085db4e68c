//! Agent definitions and the agent catalogue.

pub mod agent;
pub mod catalogue;

pub use agent::{handoff_tool_name, Agent, GuardrailConfig, Instructions, HANDOFF_TOOL_PREFIX};
pub use catalogue::AgentCatalogue;
