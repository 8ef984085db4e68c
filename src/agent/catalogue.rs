//! Name-indexed registry of agents.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::ToolDefinition;
use crate::error::ParleyError;

use super::agent::{handoff_tool_name, Agent};

/// Read-only (once built) registry of agent definitions.
#[derive(Debug, Default, Clone)]
pub struct AgentCatalogue {
    agents: HashMap<String, Arc<Agent>>,
}

impl AgentCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent. Names are unique.
    pub fn register(&mut self, agent: Agent) -> Result<(), ParleyError> {
        if self.agents.contains_key(agent.name()) {
            return Err(ParleyError::DuplicateAgent(agent.name().to_string()));
        }
        self.agents.insert(agent.name().to_string(), Arc::new(agent));
        Ok(())
    }

    /// Builder-style registration.
    pub fn with_agent(mut self, agent: Agent) -> Result<Self, ParleyError> {
        self.register(agent)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// Registered agent names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Check that every handoff points at a registered agent.
    pub fn validate(&self) -> Result<(), ParleyError> {
        for name in self.names() {
            let Some(agent) = self.agents.get(name) else {
                continue;
            };
            for target in agent.handoffs() {
                if !self.agents.contains_key(target) {
                    return Err(ParleyError::AgentNotFound(format!(
                        "{target} (handoff target of {name})"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Everything `agent` can call: its own tools, then its handoff tools.
    pub fn tool_definitions_for(&self, agent: &Agent) -> Vec<ToolDefinition> {
        let mut definitions = agent.tool_definitions();
        for target in agent.handoffs() {
            let description = self
                .agents
                .get(target)
                .and_then(|a| a.handoff_description().map(str::to_string))
                .unwrap_or_else(|| format!("Hand off the conversation to the {target} agent."));
            definitions.push(ToolDefinition {
                name: handoff_tool_name(target),
                description,
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {},
                    "required": [],
                }),
            });
        }
        definitions
    }
}
