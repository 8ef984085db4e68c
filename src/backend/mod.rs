//! Model backend interface.
//!
//! Concrete clients live outside this crate; the engine only needs one call
//! that proposes the next assistant message.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::config::RunConfig;
use crate::error::ParleyError;
use crate::types::{Message, RunState, Usage};

/// Tool definition advertised to the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Everything a backend needs for one completion.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub state: &'a RunState,
    pub agent: &'a Agent,
    /// The agent's instructions rendered against `state`.
    pub instructions: &'a str,
    /// The agent's tools plus its handoff tools.
    pub tools: &'a [ToolDefinition],
    pub config: &'a RunConfig,
}

/// Backend answer for one completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub message: Message,
    pub usage: Option<Usage>,
}

impl Completion {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Core trait implemented by model backends.
///
/// Must be safe for concurrent invocation across runs. Any `Err` is a
/// `model_provider_error` for the run; the engine never retries.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Backend name used in logs and trace events.
    fn name(&self) -> &str {
        "backend"
    }

    async fn get_completion(&self, request: CompletionRequest<'_>) -> Result<Completion, ParleyError>;
}
