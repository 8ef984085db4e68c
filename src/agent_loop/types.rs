//! Run outcome types.

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::ErrorKind;
use crate::interruption::Interruption;
use crate::types::{RunState, Usage};

/// Outcome status tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Error,
    Interrupted,
}

/// A hard failure that ended the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl RunError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

/// How a run ended. Exactly one variant is ever set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Final output: a JSON value when the agent declares an output schema,
    /// otherwise the assistant's text as a string.
    Completed { output: serde_json::Value },
    Error { error: RunError },
    /// Suspended; resumable by re-running with a resolution.
    Interrupted { interruptions: Vec<Interruption> },
}

impl Outcome {
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Completed { .. } => RunStatus::Completed,
            Self::Error { .. } => RunStatus::Error,
            Self::Interrupted { .. } => RunStatus::Interrupted,
        }
    }

    pub(crate) fn error(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self::Error {
            error: RunError::new(kind, detail),
        }
    }
}

/// Everything a run hands back to its caller.
///
/// Serializes as `{status, output|error|interruptions, final_state, usage}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunOutcome {
    #[serde(flatten)]
    pub outcome: Outcome,
    pub final_state: RunState,
    /// Usage summed over this invocation's model calls (guardrails excluded).
    #[serde(default)]
    pub usage: Usage,
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        self.outcome.status()
    }

    pub fn output(&self) -> Option<&serde_json::Value> {
        match &self.outcome {
            Outcome::Completed { output } => Some(output),
            _ => None,
        }
    }

    /// Completed output as text, when it is a string.
    pub fn output_text(&self) -> Option<&str> {
        self.output().and_then(serde_json::Value::as_str)
    }

    pub fn error(&self) -> Option<&RunError> {
        match &self.outcome {
            Outcome::Error { error } => Some(error),
            _ => None,
        }
    }

    pub fn interruptions(&self) -> &[Interruption] {
        match &self.outcome {
            Outcome::Interrupted { interruptions } => interruptions,
            _ => &[],
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, Outcome::Completed { .. })
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self.outcome, Outcome::Interrupted { .. })
    }
}
