//! Guardrail evaluator: an LLM-judged policy check on a single piece of text.
//!
//! Allow-by-default. Content is rejected only on an explicit verdict from the
//! evaluator; a failing evaluator call is an error, never a pass.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::debug;

use crate::agent::Agent;
use crate::backend::{CompletionRequest, ModelBackend};
use crate::config::RunConfig;
use crate::error::ParleyError;
use crate::types::{ModelConfig, RunState};
use crate::util::text::strip_code_fences;

const EVALUATOR_AGENT: &str = "guardrail";

const VERDICT_FORMAT: &str = "Decide whether the user's message complies with the policy above. \
Respond with JSON only: {\"is_valid\": true|false, \"reason\": \"<short reason>\"}. \
Answer is_valid=false only for a clear violation.";

static VIOLATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*(violation|blocked)\s*:\s*(.*)$")
        .expect("violation marker regex must compile")
});

/// Where a guardrail runs relative to the model call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GuardrailStage {
    Input,
    Output,
}

/// Evaluator answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuardrailVerdict {
    #[serde(alias = "isValid")]
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl GuardrailVerdict {
    pub fn allow() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Runs policy checks through a model backend.
#[derive(Clone)]
pub struct GuardrailEvaluator {
    backend: Arc<dyn ModelBackend>,
}

impl GuardrailEvaluator {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn ModelBackend> {
        &self.backend
    }

    /// Ask the evaluator whether `content` complies with `policy`.
    pub async fn evaluate(
        &self,
        content: &str,
        policy: &str,
        model: &ModelConfig,
    ) -> Result<GuardrailVerdict, ParleyError> {
        let instructions = format!("{}\n\n{VERDICT_FORMAT}", policy.trim());
        let agent = Agent::new(EVALUATOR_AGENT)
            .with_instructions(instructions.clone())
            .with_model(model.clone());
        let state = RunState::new(EVALUATOR_AGENT).with_user_message(content);
        let config = RunConfig::default();
        let request = CompletionRequest {
            state: &state,
            agent: &agent,
            instructions: &instructions,
            tools: &[],
            config: &config,
        };

        let completion = self.backend.get_completion(request).await?;
        let verdict = parse_verdict(&completion.message.content);
        debug!(
            backend = self.backend.name(),
            is_valid = verdict.is_valid,
            "guardrail evaluated"
        );
        Ok(verdict)
    }
}

impl std::fmt::Debug for GuardrailEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardrailEvaluator")
            .field("backend", &self.backend.name())
            .finish()
    }
}

/// Interpret evaluator output.
///
/// Accepts a JSON verdict (optionally fenced) or a leading `VIOLATION:` or
/// `BLOCKED:` marker followed by the reason. Anything else is a pass.
pub fn parse_verdict(text: &str) -> GuardrailVerdict {
    let body = strip_code_fences(text);
    if let Ok(verdict) = serde_json::from_str::<GuardrailVerdict>(body) {
        return verdict;
    }
    if let Some(caps) = VIOLATION_RE.captures(body) {
        let reason = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
        if reason.is_empty() {
            return GuardrailVerdict::reject("policy violation");
        }
        return GuardrailVerdict::reject(reason);
    }
    GuardrailVerdict::allow()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json_verdict() {
        let verdict = parse_verdict("```json\n{\"is_valid\": false, \"reason\": \"pii\"}\n```");
        assert_eq!(verdict, GuardrailVerdict::reject("pii"));
    }

    #[test]
    fn accepts_camel_case_field() {
        assert!(parse_verdict(r#"{"isValid": true}"#).is_valid);
    }

    #[test]
    fn violation_marker_rejects_with_reason() {
        let verdict = parse_verdict("VIOLATION: asks for credentials");
        assert_eq!(verdict, GuardrailVerdict::reject("asks for credentials"));

        let verdict = parse_verdict("  blocked:");
        assert_eq!(verdict, GuardrailVerdict::reject("policy violation"));
    }

    #[test]
    fn ambiguous_output_is_allowed() {
        assert!(parse_verdict("The message looks fine to me.").is_valid);
        assert!(parse_verdict("").is_valid);
        assert!(parse_verdict("This is not a violation").is_valid);
        assert!(parse_verdict("Unsafe? No. The message is fine.").is_valid);
        assert!(parse_verdict("Invalid premise aside, this is allowed.").is_valid);
        assert!(parse_verdict("Violation of nothing here").is_valid);
    }
}
