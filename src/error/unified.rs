//! Engine error taxonomy and recovery classification.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Machine-readable failure kind reported by the engine.
///
/// Hard kinds end a run with an `Error` outcome. Soft kinds never leave the
/// dispatcher: they are written into the tool-result message fed back to the
/// model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    AgentNotFound,
    MaxTurnsExceeded,
    ModelProviderError,
    GuardrailViolation,
    GuardrailEvaluatorFailure,
    InvalidOutputSchema,
    ToolNotFound,
    ToolExecutionError,
}

/// Whether a failure aborts the run or is fed back to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Hard,
    Soft,
}

/// Suggested caller action for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// The run may be retried as-is (transient backend fault).
    RetryRun,
    /// Change the user input before retrying.
    RephraseInput,
    /// Fix the agent catalogue or run configuration.
    CheckConfiguration,
    /// Nothing to do: the model already saw the failure.
    None,
}

impl ErrorKind {
    pub fn severity(&self) -> Severity {
        match self {
            Self::ToolNotFound | Self::ToolExecutionError => Severity::Soft,
            _ => Severity::Hard,
        }
    }

    pub fn is_hard(&self) -> bool {
        self.severity() == Severity::Hard
    }

    pub fn recovery(&self) -> RecoverySuggestion {
        match self {
            Self::ModelProviderError | Self::GuardrailEvaluatorFailure => {
                RecoverySuggestion::RetryRun
            }
            Self::GuardrailViolation => RecoverySuggestion::RephraseInput,
            Self::AgentNotFound | Self::MaxTurnsExceeded | Self::InvalidOutputSchema => {
                RecoverySuggestion::CheckConfiguration
            }
            Self::ToolNotFound | Self::ToolExecutionError => RecoverySuggestion::None,
        }
    }
}
