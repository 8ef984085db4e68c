//! Agent definitions.

use std::sync::Arc;

use crate::backend::ToolDefinition;
use crate::tools::tool::Tool;
use crate::types::{ModelConfig, RunState};

/// Prefix of the synthetic tools that hand control to another agent.
pub const HANDOFF_TOOL_PREFIX: &str = "transfer_to_";

/// Renders instructions from the current state.
pub type InstructionsFn = Arc<dyn Fn(&RunState) -> String + Send + Sync>;

/// System instructions for an agent.
#[derive(Clone)]
pub enum Instructions {
    Static(String),
    Dynamic(InstructionsFn),
}

impl Instructions {
    pub fn render(&self, state: &RunState) -> String {
        match self {
            Self::Static(text) => text.clone(),
            Self::Dynamic(f) => f(state),
        }
    }
}

impl Default for Instructions {
    fn default() -> Self {
        Self::Static(String::new())
    }
}

impl std::fmt::Debug for Instructions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(text) => f.debug_tuple("Static").field(text).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Policy checks applied around an agent's model calls.
#[derive(Debug, Clone, Default)]
pub struct GuardrailConfig {
    /// Policy prompt applied to the latest user message before the model call.
    pub input_policy: Option<String>,
    /// Policy prompt applied to the final assistant output.
    pub output_policy: Option<String>,
    /// Model settings for the evaluator call.
    pub model: ModelConfig,
}

impl GuardrailConfig {
    pub fn input(policy: impl Into<String>) -> Self {
        Self {
            input_policy: Some(policy.into()),
            ..Default::default()
        }
    }

    pub fn output(policy: impl Into<String>) -> Self {
        Self {
            output_policy: Some(policy.into()),
            ..Default::default()
        }
    }

    pub fn with_input(mut self, policy: impl Into<String>) -> Self {
        self.input_policy = Some(policy.into());
        self
    }

    pub fn with_output(mut self, policy: impl Into<String>) -> Self {
        self.output_policy = Some(policy.into());
        self
    }

    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }
}

/// An agent definition. Immutable once registered in a catalogue.
#[derive(Clone)]
pub struct Agent {
    name: String,
    instructions: Instructions,
    tools: Vec<Arc<dyn Tool>>,
    model: ModelConfig,
    output_schema: Option<serde_json::Value>,
    guardrails: Option<GuardrailConfig>,
    handoffs: Vec<String>,
    handoff_description: Option<String>,
}

impl Agent {
    /// Create a new agent.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Instructions::default(),
            tools: Vec::new(),
            model: ModelConfig::default(),
            output_schema: None,
            guardrails: None,
            handoffs: Vec::new(),
            handoff_description: None,
        }
    }

    /// Set static instructions.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Instructions::Static(instructions.into());
        self
    }

    /// Set instructions computed from the run state on every model call.
    pub fn with_dynamic_instructions<F>(mut self, f: F) -> Self
    where
        F: Fn(&RunState) -> String + Send + Sync + 'static,
    {
        self.instructions = Instructions::Dynamic(Arc::new(f));
        self
    }

    /// Add a tool.
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    /// Add a shared tool.
    pub fn with_shared_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    /// Require the final output to be JSON matching `schema`.
    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_guardrails(mut self, guardrails: GuardrailConfig) -> Self {
        self.guardrails = Some(guardrails);
        self
    }

    /// Allow this agent to hand control to `target`.
    pub fn with_handoff(mut self, target: impl Into<String>) -> Self {
        self.handoffs.push(target.into());
        self
    }

    /// Text other agents see in the handoff tool pointing at this agent.
    pub fn with_handoff_description(mut self, description: impl Into<String>) -> Self {
        self.handoff_description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &Instructions {
        &self.instructions
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    pub fn output_schema(&self) -> Option<&serde_json::Value> {
        self.output_schema.as_ref()
    }

    pub fn guardrails(&self) -> Option<&GuardrailConfig> {
        self.guardrails.as_ref()
    }

    pub fn handoffs(&self) -> &[String] {
        &self.handoffs
    }

    pub fn handoff_description(&self) -> Option<&str> {
        self.handoff_description.as_deref()
    }

    /// Render instructions for `state`.
    pub fn instructions_for(&self, state: &RunState) -> String {
        self.instructions.render(state)
    }

    /// Resolve a tool by exact name.
    pub fn find_tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// The agent a handoff tool name points at, if it is one of ours.
    pub fn handoff_target(&self, tool_name: &str) -> Option<&str> {
        self.handoffs
            .iter()
            .find(|target| handoff_tool_name(target) == tool_name)
            .map(String::as_str)
    }

    /// Definitions of the agent's own tools, in registration order.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters().schema.clone(),
            })
            .collect()
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("instructions", &self.instructions)
            .field(
                "tools",
                &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field("model", &self.model)
            .field("output_schema", &self.output_schema.is_some())
            .field("handoffs", &self.handoffs)
            .finish()
    }
}

/// Name of the synthetic tool that hands control to `agent`.
pub fn handoff_tool_name(agent: &str) -> String {
    let slug: String = agent
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{HANDOFF_TOOL_PREFIX}{slug}")
}
