//! Trace events emitted by the turn loop.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::guardrail::GuardrailStage;
use crate::interruption::ClarificationOption;
use crate::types::{Message, RunId, ToolCall, Usage};

use super::types::RunStatus;

/// One observable transition of a run. Never feeds back into engine state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    RunStart {
        agent: String,
        turn: u32,
        /// The run re-entered an unfinished tool batch.
        resuming: bool,
    },
    LlmCallStart {
        agent: String,
        turn: u32,
        message_count: usize,
    },
    LlmCallEnd {
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    AssistantMessage {
        agent: String,
        message: Message,
    },
    ToolRequests {
        agent: String,
        calls: Vec<ToolCall>,
    },
    /// The argument interception point; `arguments` are the ones the tool receives.
    BeforeToolExecution {
        tool_call_id: String,
        tool_name: String,
        original_arguments: serde_json::Value,
        arguments: serde_json::Value,
        modified: bool,
    },
    ToolCallStart {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },
    ToolCallEnd {
        tool_call_id: String,
        tool_name: String,
        result: serde_json::Value,
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<ErrorKind>,
    },
    ToolResultsToLlm {
        agent: String,
        results: Vec<Message>,
    },
    GuardrailCheck {
        stage: GuardrailStage,
        agent: String,
    },
    GuardrailViolation {
        stage: GuardrailStage,
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Handoff {
        from: String,
        to: String,
        tool_call_id: String,
    },
    ClarificationRequested {
        interruption_id: String,
        tool_call_id: String,
        question: String,
        options: Vec<ClarificationOption>,
    },
    ClarificationProvided {
        interruption_id: String,
        tool_call_id: String,
        selected: String,
    },
    ElicitationRequested {
        interruption_id: String,
        tool_call_id: String,
        message: String,
    },
    AuthorizationRequired {
        interruption_id: String,
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        authorization_url: Option<String>,
    },
    TurnEnd {
        agent: String,
        turn: u32,
    },
    FinalOutput {
        agent: String,
        output: serde_json::Value,
    },
    RunEnd {
        status: RunStatus,
        turn: u32,
    },
}

impl TraceEvent {
    /// Snake-case event name, as serialized in the `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunStart { .. } => "run_start",
            Self::LlmCallStart { .. } => "llm_call_start",
            Self::LlmCallEnd { .. } => "llm_call_end",
            Self::AssistantMessage { .. } => "assistant_message",
            Self::ToolRequests { .. } => "tool_requests",
            Self::BeforeToolExecution { .. } => "before_tool_execution",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolCallEnd { .. } => "tool_call_end",
            Self::ToolResultsToLlm { .. } => "tool_results_to_llm",
            Self::GuardrailCheck { .. } => "guardrail_check",
            Self::GuardrailViolation { .. } => "guardrail_violation",
            Self::Handoff { .. } => "handoff",
            Self::ClarificationRequested { .. } => "clarification_requested",
            Self::ClarificationProvided { .. } => "clarification_provided",
            Self::ElicitationRequested { .. } => "elicitation_requested",
            Self::AuthorizationRequired { .. } => "authorization_required",
            Self::TurnEnd { .. } => "turn_end",
            Self::FinalOutput { .. } => "final_output",
            Self::RunEnd { .. } => "run_end",
        }
    }
}

/// Envelope delivered to callbacks and streams.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineEvent {
    pub run_id: RunId,
    pub trace_id: String,
    /// Position within this invocation, starting at 1.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    /// Labels from [`RunConfig::metadata`](crate::config::RunConfig::metadata).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(flatten)]
    pub event: TraceEvent,
}
