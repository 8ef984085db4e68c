//! Suspension payloads, interruption records, and resolutions.
//!
//! A tool suspends by returning [`ToolError::Suspend`](crate::tools::ToolError)
//! with one of three payloads. The engine packages it into an [`Interruption`]:
//! a plain, serializable record holding the paused call, the state just before
//! that call, and the run configuration. Resuming is re-entry into the normal
//! run entry point with a [`Resolution`] keyed by the interruption id; no
//! control flow is kept alive in between.

pub mod store;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};

use crate::config::RunConfig;
use crate::types::{RunId, RunState, ToolCall};

pub use store::{InMemoryInterruptionStore, InterruptionStore};
#[cfg(feature = "file-store")]
pub use store::FileInterruptionStore;

/// Suspension cause category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InterruptionType {
    ToolAuth,
    Elicitation,
    Clarification,
}

/// A tool's request for an authorization flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthChallenge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

impl AuthChallenge {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            authorization_url: Some(url.into()),
            ..Default::default()
        }
    }
}

/// A tool's request for structured input from a human.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElicitationRequest {
    pub message: String,
    /// JSON Schema the submitted content must follow.
    #[serde(default)]
    pub requested_schema: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ElicitationRequest {
    pub fn new(message: impl Into<String>, requested_schema: serde_json::Value) -> Self {
        Self {
            message: message.into(),
            requested_schema,
            session_id: None,
        }
    }
}

/// One choice offered by a clarification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClarificationOption {
    pub id: String,
    pub label: String,
}

impl From<String> for ClarificationOption {
    fn from(label: String) -> Self {
        Self {
            id: label.clone(),
            label,
        }
    }
}

impl From<&str> for ClarificationOption {
    fn from(label: &str) -> Self {
        Self::from(label.to_string())
    }
}

/// A tool's request to disambiguate among discrete options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClarificationRequest {
    pub question: String,
    pub options: Vec<ClarificationOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification_id: Option<String>,
}

impl ClarificationRequest {
    pub fn new<I, S>(question: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            question: question.into(),
            options: options
                .into_iter()
                .map(|label| ClarificationOption::from(label.into()))
                .collect(),
            clarification_id: None,
        }
    }
}

/// Payload carried by a suspending tool.
#[derive(Debug, Clone, PartialEq)]
pub enum Suspension {
    ToolAuth(AuthChallenge),
    Elicitation(ElicitationRequest),
    Clarification(ClarificationRequest),
}

impl Suspension {
    pub fn kind(&self) -> InterruptionType {
        match self {
            Self::ToolAuth(_) => InterruptionType::ToolAuth,
            Self::Elicitation(_) => InterruptionType::Elicitation,
            Self::Clarification(_) => InterruptionType::Clarification,
        }
    }
}

/// What the run is waiting for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InterruptionKind {
    ToolAuth {
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        authorization_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        scopes: Vec<String>,
    },
    Elicitation {
        request: ElicitationRequest,
        session_id: String,
    },
    Clarification {
        clarification_id: String,
        question: String,
        options: Vec<ClarificationOption>,
    },
}

impl InterruptionKind {
    pub fn interruption_type(&self) -> InterruptionType {
        match self {
            Self::ToolAuth { .. } => InterruptionType::ToolAuth,
            Self::Elicitation { .. } => InterruptionType::Elicitation,
            Self::Clarification { .. } => InterruptionType::Clarification,
        }
    }
}

/// A packaged suspension, sufficient to resume the run later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interruption {
    /// Stable id; key for the matching entry in `pending_resolutions`.
    pub id: String,
    pub run_id: RunId,
    /// Agent whose tool suspended.
    pub agent: String,
    /// The exact paused call.
    pub tool_call: ToolCall,
    #[serde(flatten)]
    pub kind: InterruptionKind,
    /// Conversation state immediately before the paused call.
    pub state: Box<RunState>,
    pub config: RunConfig,
}

impl Interruption {
    pub fn interruption_type(&self) -> InterruptionType {
        self.kind.interruption_type()
    }

    /// Whether `resolution` is the right shape for this interruption.
    pub fn accepts(&self, resolution: &Resolution) -> bool {
        match (&self.kind, resolution) {
            (InterruptionKind::ToolAuth { .. }, Resolution::ToolAuth { .. }) => true,
            (InterruptionKind::Elicitation { .. }, Resolution::Elicitation { .. }) => true,
            (InterruptionKind::Clarification { options, .. }, Resolution::Clarification { selected }) => {
                options.iter().any(|o| &o.id == selected || &o.label == selected)
            }
            _ => false,
        }
    }

    /// The state to hand back to the engine to resume with `resolution`.
    ///
    /// Starts from the snapshot; callers holding a newer `final_state` can
    /// use [`RunState::with_resolution`] instead.
    pub fn resume_state(&self, resolution: Resolution) -> RunState {
        (*self.state)
            .clone()
            .with_resolution(self.id.clone(), resolution)
    }
}

/// User action on an elicitation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ElicitationAction {
    Accept,
    Decline,
    Cancel,
}

/// Out-of-band answer to an interruption.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Resolution {
    ToolAuth {
        #[serde(default)]
        callback: serde_json::Value,
    },
    Elicitation {
        action: ElicitationAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<serde_json::Value>,
    },
    Clarification {
        selected: String,
    },
}

impl Resolution {
    pub fn clarification(selected: impl Into<String>) -> Self {
        Self::Clarification {
            selected: selected.into(),
        }
    }

    pub fn accept(content: serde_json::Value) -> Self {
        Self::Elicitation {
            action: ElicitationAction::Accept,
            content: Some(content),
        }
    }

    pub fn interruption_type(&self) -> InterruptionType {
        match self {
            Self::ToolAuth { .. } => InterruptionType::ToolAuth,
            Self::Elicitation { .. } => InterruptionType::Elicitation,
            Self::Clarification { .. } => InterruptionType::Clarification,
        }
    }
}

/// Deterministic interruption id for a tool call within a run.
pub fn interruption_id(run_id: &RunId, tool_call_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(run_id.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(tool_call_id.as_bytes());
    let digest = hasher.finalize();
    format!("int_{}", URL_SAFE_NO_PAD.encode(&digest[..12]))
}

/// Wrap a suspension signal into a resumable record.
pub fn package(
    suspension: Suspension,
    call: &ToolCall,
    agent: &str,
    snapshot: &RunState,
    config: &RunConfig,
) -> Interruption {
    let id = interruption_id(&snapshot.run_id, &call.id);
    let kind = match suspension {
        Suspension::ToolAuth(challenge) => InterruptionKind::ToolAuth {
            tool_call_id: call.id.clone(),
            authorization_url: challenge.authorization_url,
            provider: challenge.provider,
            scopes: challenge.scopes,
        },
        Suspension::Elicitation(request) => InterruptionKind::Elicitation {
            session_id: request.session_id.clone().unwrap_or_else(|| id.clone()),
            request,
        },
        Suspension::Clarification(request) => InterruptionKind::Clarification {
            clarification_id: request.clarification_id.unwrap_or_else(|| id.clone()),
            question: request.question,
            options: request.options,
        },
    };
    Interruption {
        id,
        run_id: snapshot.run_id,
        agent: agent.to_string(),
        tool_call: call.clone(),
        kind,
        state: Box::new(snapshot.clone()),
        config: config.clone(),
    }
}
