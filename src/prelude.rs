//! Convenience re-exports for common use.

pub use crate::agent::{Agent, AgentCatalogue, GuardrailConfig};
pub use crate::agent_loop::{
    Engine, EngineEvent, Outcome, RunError, RunEventSink, RunOutcome, RunStatus, StreamItem,
    TraceEvent,
};
pub use crate::backend::{Completion, CompletionRequest, ModelBackend, ToolDefinition};
pub use crate::config::RunConfig;
pub use crate::error::{ErrorKind, ParleyError, Result};
pub use crate::interruption::{
    AuthChallenge, ClarificationRequest, ElicitationAction, ElicitationRequest, Interruption,
    InterruptionKind, InterruptionStore, Resolution,
};
pub use crate::tools::{FnTool, Tool, ToolArguments, ToolError, ToolExecutionContext, ToolParameters};
pub use crate::types::{Message, ModelConfig, Role, RunState, ToolCall, Usage};
