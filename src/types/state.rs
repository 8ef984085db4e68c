//! Run state: the sole input/output currency of every engine call.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParleyError;
use crate::interruption::Resolution;

use super::message::{Message, Role, ToolCall};

/// Unique run identifier.
pub type RunId = Uuid;

/// Conversation state handed to and returned from the engine.
///
/// The engine never mutates a caller's value in place: each run takes a state
/// by value and hands back the state it ended with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunState {
    pub run_id: RunId,
    pub trace_id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub current_agent: String,
    /// Caller-defined context, passed to every tool execution.
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub turn_count: u32,
    /// Resolutions keyed by interruption id; empty unless resuming.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pending_resolutions: BTreeMap<String, Resolution>,
}

/// The unanswered tail of the last tool-call batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBatch {
    /// Index of the assistant message that requested the batch.
    pub assistant_index: usize,
    /// Agent that issued the batch, when recorded on the message.
    pub agent: Option<String>,
    /// Calls without a tool-result message, in request order.
    pub calls: Vec<ToolCall>,
}

impl RunState {
    /// Start a fresh conversation with the given entry agent.
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            trace_id: format!("trace_{}", Uuid::new_v4().simple()),
            messages: Vec::new(),
            current_agent: agent.into(),
            context: serde_json::Value::Null,
            turn_count: 0,
            pending_resolutions: BTreeMap::new(),
        }
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_user_message(self, text: impl Into<String>) -> Self {
        self.with_message(Message::user(text))
    }

    /// Attach a resolution for a previously returned interruption.
    pub fn with_resolution(mut self, interruption_id: impl Into<String>, resolution: Resolution) -> Self {
        self.pending_resolutions
            .insert(interruption_id.into(), resolution);
        self
    }

    /// The most recent user message, if any.
    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }

    /// Locate the tool calls of the last batch that never got a result.
    ///
    /// Only a batch followed exclusively by tool messages counts; once any
    /// other message has been appended the batch is considered closed.
    pub fn pending_tool_calls(&self) -> Option<PendingBatch> {
        let assistant_index = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::Assistant && m.has_tool_calls())?;
        let tail = &self.messages[assistant_index + 1..];
        if tail.iter().any(|m| m.role != Role::Tool) {
            return None;
        }
        let answered: HashSet<&str> = tail
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        let assistant = &self.messages[assistant_index];
        let calls: Vec<ToolCall> = assistant
            .tool_calls
            .iter()
            .filter(|call| !answered.contains(call.id.as_str()))
            .cloned()
            .collect();
        if calls.is_empty() {
            return None;
        }
        Some(PendingBatch {
            assistant_index,
            agent: assistant.name.clone(),
            calls,
        })
    }

    /// Check transcript invariants.
    ///
    /// Tool-call ids are unique within their assistant message, and every
    /// tool message answers exactly one call of the batch that precedes it.
    pub fn validate(&self) -> Result<(), ParleyError> {
        let mut open: Option<HashSet<&str>> = None;
        let mut answered: HashSet<&str> = HashSet::new();
        for (index, message) in self.messages.iter().enumerate() {
            match message.role {
                Role::Assistant if message.has_tool_calls() => {
                    let mut ids = HashSet::new();
                    for call in &message.tool_calls {
                        if !ids.insert(call.id.as_str()) {
                            return Err(ParleyError::InvalidState(format!(
                                "duplicate tool call id '{}' in message {index}",
                                call.id
                            )));
                        }
                    }
                    open = Some(ids);
                    answered.clear();
                }
                Role::Tool => {
                    let Some(id) = message.tool_call_id.as_deref() else {
                        return Err(ParleyError::InvalidState(format!(
                            "tool message {index} has no tool_call_id"
                        )));
                    };
                    let known = open.as_ref().is_some_and(|ids| ids.contains(id));
                    if !known {
                        return Err(ParleyError::InvalidState(format!(
                            "tool message {index} answers unknown call '{id}'"
                        )));
                    }
                    if !answered.insert(id) {
                        return Err(ParleyError::InvalidState(format!(
                            "tool call '{id}' answered more than once"
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}
