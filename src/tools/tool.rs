//! Tool trait, execution context, and closure-based tool wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::arguments::ToolArguments;
use super::types::ToolParameters;
use crate::error::ParleyError;
use crate::interruption::{
    AuthChallenge, ClarificationRequest, ElicitationAction, ElicitationRequest, Resolution,
    Suspension,
};
use crate::types::RunId;

/// Context passed explicitly to every tool execution.
#[derive(Debug, Clone)]
pub struct ToolExecutionContext {
    pub run_id: RunId,
    pub trace_id: String,
    /// Agent whose tool list resolved this call.
    pub agent: String,
    pub tool_call_id: String,
    pub tool_name: String,
    /// Caller-defined context from the run state.
    pub context: serde_json::Value,
    /// Present only when resuming the call that previously suspended.
    pub resolution: Option<Resolution>,
}

impl ToolExecutionContext {
    pub fn resolution(&self) -> Option<&Resolution> {
        self.resolution.as_ref()
    }

    /// The option chosen by the user for a clarification.
    pub fn clarification_answer(&self) -> Option<&str> {
        match self.resolution.as_ref()? {
            Resolution::Clarification { selected } => Some(selected.as_str()),
            _ => None,
        }
    }

    /// The user's response to an elicitation.
    pub fn elicitation_response(&self) -> Option<(ElicitationAction, Option<&serde_json::Value>)> {
        match self.resolution.as_ref()? {
            Resolution::Elicitation { action, content } => Some((*action, content.as_ref())),
            _ => None,
        }
    }

    /// The callback payload delivered after an authorization challenge.
    pub fn auth_callback(&self) -> Option<&serde_json::Value> {
        match self.resolution.as_ref()? {
            Resolution::ToolAuth { callback } => Some(callback),
            _ => None,
        }
    }
}

/// Non-success outcome of a tool execution.
#[derive(Error, Debug)]
pub enum ToolError {
    /// Ordinary failure; fed back to the model as a soft error.
    #[error("{0}")]
    Failed(String),

    /// The tool needs something only a human can supply.
    #[error("tool suspended: {}", .0.kind())]
    Suspend(Suspension),
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Suspend until the user picks one of `options`.
    pub fn clarify<I, S>(question: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Suspend(Suspension::Clarification(ClarificationRequest::new(
            question, options,
        )))
    }

    /// Suspend until the user submits structured input.
    pub fn elicit(request: ElicitationRequest) -> Self {
        Self::Suspend(Suspension::Elicitation(request))
    }

    /// Suspend until an authorization flow completes.
    pub fn authorize(challenge: AuthChallenge) -> Self {
        Self::Suspend(Suspension::ToolAuth(challenge))
    }

    pub fn is_suspension(&self) -> bool {
        matches!(self, Self::Suspend(_))
    }
}

impl From<ParleyError> for ToolError {
    fn from(err: ParleyError) -> Self {
        Self::Failed(err.to_string())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Failed(err.to_string())
    }
}

/// A callable tool. Implement directly, or wrap a closure with [`FnTool`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must match what the model calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema parameters.
    fn parameters(&self) -> &ToolParameters;

    /// Execute the tool with parsed arguments.
    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, ToolError>;
}

type ToolHandler = dyn Fn(
        ToolArguments,
        ToolExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send>>
    + Send
    + Sync;

/// Closure-based tool for quick tool creation.
pub struct FnTool {
    name: String,
    description: String,
    parameters: ToolParameters,
    handler: Arc<ToolHandler>,
}

impl FnTool {
    /// Create a tool from a closure.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, ToolError> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}
