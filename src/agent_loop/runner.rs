//! The turn loop.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentCatalogue};
use crate::backend::{CompletionRequest, ModelBackend};
use crate::config::RunConfig;
use crate::error::ErrorKind;
use crate::guardrail::{GuardrailEvaluator, GuardrailStage};
use crate::interruption::{self, Interruption, InterruptionKind, Resolution};
use crate::tools::validation::validate_value;
use crate::types::{Message, Role, RunState, ToolCall, Usage};
use crate::util::text::strip_code_fences;

use super::dispatch::{BeforeToolHook, ToolDispatcher, ToolInterception, ToolOutcome};
use super::emitter::{RunEventEmitter, RunEventSink};
use super::events::TraceEvent;
use super::types::{Outcome, RunOutcome};

/// A streaming consumer stopped pulling; no one is waiting for an outcome.
#[derive(Debug)]
pub(crate) struct Cancelled;

type Step<T> = Result<T, Cancelled>;

enum BatchOutcome {
    Completed { handed_off: bool },
    Interrupted(Box<Interruption>),
}

/// Per-invocation bookkeeping.
struct RunContext<'a> {
    config: &'a RunConfig,
    emitter: &'a RunEventEmitter,
    usage: Usage,
}

/// Agent execution engine.
///
/// Holds no per-run state: concurrent runs share one engine freely.
#[derive(Clone)]
pub struct Engine {
    catalogue: Arc<AgentCatalogue>,
    backend: Arc<dyn ModelBackend>,
    guardrail: GuardrailEvaluator,
    before_tool: Option<BeforeToolHook>,
}

impl Engine {
    /// Guardrails use `backend` too unless [`Engine::with_guardrail_backend`] is set.
    pub fn new(catalogue: AgentCatalogue, backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            catalogue: Arc::new(catalogue),
            guardrail: GuardrailEvaluator::new(Arc::clone(&backend)),
            backend,
            before_tool: None,
        }
    }

    /// Use a separate (typically cheaper) backend for guardrail checks.
    pub fn with_guardrail_backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.guardrail = GuardrailEvaluator::new(backend);
        self
    }

    /// Install the argument interception hook.
    pub fn with_before_tool_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ToolInterception<'_>) -> Option<serde_json::Value> + Send + Sync + 'static,
    {
        self.before_tool = Some(Arc::new(hook));
        self
    }

    pub fn catalogue(&self) -> &AgentCatalogue {
        &self.catalogue
    }

    /// Run (or resume) a conversation.
    ///
    /// Resuming is the same call with `pending_resolutions` filled in on the
    /// state returned by the interrupted run.
    pub async fn run(&self, state: RunState, config: &RunConfig) -> RunOutcome {
        let emitter = RunEventEmitter::silent(state.run_id, state.trace_id.clone())
            .with_metadata(config.metadata.clone());
        self.run_with_emitter(state, config, &emitter).await
    }

    /// Like [`Engine::run`], delivering every event to `sink` as it happens.
    pub async fn run_with_sink(
        &self,
        state: RunState,
        config: &RunConfig,
        sink: RunEventSink,
    ) -> RunOutcome {
        let emitter = RunEventEmitter::callback(state.run_id, state.trace_id.clone(), sink)
            .with_metadata(config.metadata.clone());
        self.run_with_emitter(state, config, &emitter).await
    }

    /// Buffered delivery: `emitter` is silent or callback-backed.
    ///
    /// Those emitters never report cancellation, so `drive` only returns
    /// `Err(Cancelled)` if a channel emitter is passed here by mistake. That
    /// case surfaces as a retryable `ModelProviderError` carrying the input
    /// state, so the caller can rerun the same call unchanged.
    async fn run_with_emitter(
        &self,
        state: RunState,
        config: &RunConfig,
        emitter: &RunEventEmitter,
    ) -> RunOutcome {
        let fallback = state.clone();
        match self.drive(state, config, emitter).await {
            Ok(outcome) => outcome,
            Err(Cancelled) => RunOutcome {
                outcome: Outcome::error(ErrorKind::ModelProviderError, "run cancelled"),
                final_state: fallback,
                usage: Usage::default(),
            },
        }
    }

    pub(crate) async fn drive(
        &self,
        mut state: RunState,
        config: &RunConfig,
        emitter: &RunEventEmitter,
    ) -> Step<RunOutcome> {
        let mut cx = RunContext {
            config,
            emitter,
            usage: Usage::default(),
        };
        if let Err(err) = state.validate() {
            warn!(run_id = %state.run_id, error = %err, "run state violates transcript invariants");
        }

        let mut resume = state.pending_tool_calls();
        // The user message was already checked when a resumed run first suspended.
        let mut input_checked: HashSet<String> = HashSet::new();
        if resume.is_some() {
            input_checked.insert(state.current_agent.clone());
        }

        cx.emit(TraceEvent::RunStart {
            agent: state.current_agent.clone(),
            turn: state.turn_count,
            resuming: resume.is_some(),
        })
        .await;
        debug!(run_id = %state.run_id, agent = %state.current_agent, turn = state.turn_count, "run started");

        loop {
            if state.turn_count >= config.max_turns {
                let detail = format!("max turns ({}) exceeded", config.max_turns);
                return Ok(self
                    .finish(&mut cx, Outcome::error(ErrorKind::MaxTurnsExceeded, detail), state)
                    .await);
            }

            let Some(agent) = self.catalogue.get(&state.current_agent) else {
                let detail = format!("agent '{}' is not registered", state.current_agent);
                return Ok(self
                    .finish(&mut cx, Outcome::error(ErrorKind::AgentNotFound, detail), state)
                    .await);
            };

            if let Some(batch) = resume.take() {
                let issuer = match batch.agent.as_deref() {
                    Some(name) if name != agent.name() => match self.catalogue.get(name) {
                        Some(issuer) => issuer,
                        None => {
                            let detail = format!("agent '{name}' is not registered");
                            return Ok(self
                                .finish(&mut cx, Outcome::error(ErrorKind::AgentNotFound, detail), state)
                                .await);
                        }
                    },
                    _ => Arc::clone(&agent),
                };
                debug!(run_id = %state.run_id, agent = issuer.name(), calls = batch.calls.len(), "resuming tool batch");
                match self.dispatch_batch(&mut cx, &mut state, &issuer, batch.calls).await? {
                    BatchOutcome::Interrupted(interruption) => {
                        return Ok(self.interrupt(&mut cx, *interruption, state).await);
                    }
                    BatchOutcome::Completed { handed_off } => {
                        self.close_turn(&mut cx, &mut state, issuer.name(), handed_off)
                            .await;
                        continue;
                    }
                }
            }

            discard_stale_resolutions(&mut state);

            if !input_checked.contains(agent.name()) {
                input_checked.insert(agent.name().to_string());
                let policy = agent.guardrails().and_then(|g| g.input_policy.as_deref());
                let content = state.last_user_message().map(|m| m.content.clone());
                if let (Some(policy), Some(content)) = (policy, content) {
                    if let Some(outcome) = self
                        .check_guardrail(&mut cx, &agent, GuardrailStage::Input, &content, policy)
                        .await?
                    {
                        return Ok(self.finish(&mut cx, outcome, state).await);
                    }
                }
            }

            if cx.emitter.is_cancelled() {
                return Err(Cancelled);
            }
            let message = match self.call_model(&mut cx, &agent, &state).await {
                Ok(message) => message,
                Err(outcome) => return Ok(self.finish(&mut cx, *outcome, state).await),
            };
            if cx.emitter.is_cancelled() {
                return Err(Cancelled);
            }

            if !message.has_tool_calls() {
                return self.complete(&mut cx, &agent, message, state).await;
            }

            let calls = message.tool_calls.clone();
            state.messages.push(message);
            cx.emit(TraceEvent::ToolRequests {
                agent: agent.name().to_string(),
                calls: calls.clone(),
            })
            .await;

            match self.dispatch_batch(&mut cx, &mut state, &agent, calls).await? {
                BatchOutcome::Interrupted(interruption) => {
                    return Ok(self.interrupt(&mut cx, *interruption, state).await);
                }
                BatchOutcome::Completed { handed_off } => {
                    self.close_turn(&mut cx, &mut state, agent.name(), handed_off)
                        .await;
                }
            }
        }
    }

    /// One backend call. A hard failure comes back as the outcome to return.
    async fn call_model(
        &self,
        cx: &mut RunContext<'_>,
        agent: &Agent,
        state: &RunState,
    ) -> Result<Message, Box<Outcome>> {
        let instructions = agent.instructions_for(state);
        let tools = self.catalogue.tool_definitions_for(agent);
        cx.emit(TraceEvent::LlmCallStart {
            agent: agent.name().to_string(),
            turn: state.turn_count,
            message_count: state.messages.len(),
        })
        .await;
        debug!(
            run_id = %state.run_id,
            agent = agent.name(),
            turn = state.turn_count,
            backend = self.backend.name(),
            "calling model"
        );

        let request = CompletionRequest {
            state,
            agent,
            instructions: &instructions,
            tools: &tools,
            config: cx.config,
        };
        let completion = match self.backend.get_completion(request).await {
            Ok(completion) => completion,
            Err(err) => {
                warn!(run_id = %state.run_id, agent = agent.name(), error = %err, "model call failed");
                return Err(Box::new(Outcome::error(
                    ErrorKind::ModelProviderError,
                    err.to_string(),
                )));
            }
        };
        if let Some(usage) = &completion.usage {
            cx.usage.merge(usage);
        }
        cx.emit(TraceEvent::LlmCallEnd {
            agent: agent.name().to_string(),
            usage: completion.usage.clone(),
        })
        .await;

        let message = completion.message;
        if message.role != Role::Assistant {
            return Err(Box::new(Outcome::error(
                ErrorKind::ModelProviderError,
                format!("backend returned a {:?} message", message.role),
            )));
        }
        if let Some(id) = duplicate_call_id(&message.tool_calls) {
            return Err(Box::new(Outcome::error(
                ErrorKind::ModelProviderError,
                format!("backend repeated tool call id '{id}'"),
            )));
        }
        let message = message.with_name(agent.name());
        cx.emit(TraceEvent::AssistantMessage {
            agent: agent.name().to_string(),
            message: message.clone(),
        })
        .await;
        Ok(message)
    }

    /// Final-answer path: output guardrail, schema check, append, complete.
    async fn complete(
        &self,
        cx: &mut RunContext<'_>,
        agent: &Agent,
        message: Message,
        mut state: RunState,
    ) -> Step<RunOutcome> {
        if let Some(policy) = agent.guardrails().and_then(|g| g.output_policy.as_deref()) {
            if let Some(outcome) = self
                .check_guardrail(cx, agent, GuardrailStage::Output, &message.content, policy)
                .await?
            {
                return Ok(self.finish(cx, outcome, state).await);
            }
        }

        let output = match agent.output_schema() {
            None => serde_json::Value::String(message.content.clone()),
            Some(schema) => match parse_structured_output(&message.content, schema) {
                Ok(value) => value,
                Err(detail) => {
                    warn!(run_id = %state.run_id, agent = agent.name(), error = %detail, "output does not match schema");
                    return Ok(self
                        .finish(cx, Outcome::error(ErrorKind::InvalidOutputSchema, detail), state)
                        .await);
                }
            },
        };

        state.messages.push(message);
        cx.emit(TraceEvent::FinalOutput {
            agent: agent.name().to_string(),
            output: output.clone(),
        })
        .await;
        Ok(self.finish(cx, Outcome::Completed { output }, state).await)
    }

    /// `Some(outcome)` when the check fails the run.
    async fn check_guardrail(
        &self,
        cx: &mut RunContext<'_>,
        agent: &Agent,
        stage: GuardrailStage,
        content: &str,
        policy: &str,
    ) -> Step<Option<Outcome>> {
        if cx.emitter.is_cancelled() {
            return Err(Cancelled);
        }
        cx.emit(TraceEvent::GuardrailCheck {
            stage,
            agent: agent.name().to_string(),
        })
        .await;
        let model = agent
            .guardrails()
            .map(|g| g.model.clone())
            .unwrap_or_default();
        let verdict = match self.guardrail.evaluate(content, policy, &model).await {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(agent = agent.name(), %stage, error = %err, "guardrail evaluator failed");
                return Ok(Some(Outcome::error(
                    ErrorKind::GuardrailEvaluatorFailure,
                    err.to_string(),
                )));
            }
        };
        if verdict.is_valid {
            return Ok(None);
        }
        info!(agent = agent.name(), %stage, reason = ?verdict.reason, "guardrail violation");
        cx.emit(TraceEvent::GuardrailViolation {
            stage,
            agent: agent.name().to_string(),
            reason: verdict.reason.clone(),
        })
        .await;
        let detail = verdict
            .reason
            .unwrap_or_else(|| format!("{stage} guardrail rejected the message"));
        Ok(Some(Outcome::error(ErrorKind::GuardrailViolation, detail)))
    }

    /// Dispatch `calls` in order on behalf of `issuer`, appending results.
    ///
    /// Stops at the first suspension. A stored resolution is consumed by the
    /// call it belongs to.
    async fn dispatch_batch(
        &self,
        cx: &mut RunContext<'_>,
        state: &mut RunState,
        issuer: &Agent,
        calls: Vec<ToolCall>,
    ) -> Step<BatchOutcome> {
        let dispatcher = ToolDispatcher {
            before_tool: self.before_tool.as_ref(),
            emitter: cx.emitter,
            config: cx.config,
        };
        let mut handed_off = false;
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            if cx.emitter.is_cancelled() {
                return Err(Cancelled);
            }
            let interruption_id = interruption::interruption_id(&state.run_id, &call.id);
            let resolution = state.pending_resolutions.remove(&interruption_id);
            if let Some(Resolution::Clarification { selected }) = &resolution {
                cx.emit(TraceEvent::ClarificationProvided {
                    interruption_id: interruption_id.clone(),
                    tool_call_id: call.id.clone(),
                    selected: selected.clone(),
                })
                .await;
            }

            let message = match dispatcher.dispatch(&call, issuer, state, resolution).await {
                ToolOutcome::Finished { content, is_error } => {
                    Message::tool_result(call.id.clone(), content, is_error)
                }
                ToolOutcome::Handoff { target, content } => {
                    let from = std::mem::replace(&mut state.current_agent, target.clone());
                    info!(run_id = %state.run_id, %from, to = %target, "handoff");
                    cx.emit(TraceEvent::Handoff {
                        from,
                        to: target,
                        tool_call_id: call.id.clone(),
                    })
                    .await;
                    handed_off = true;
                    Message::tool_result(call.id.clone(), content, false)
                }
                ToolOutcome::Suspended(suspension) => {
                    let interruption =
                        interruption::package(suspension, &call, issuer.name(), state, cx.config);
                    cx.emit(requested_event(&interruption)).await;
                    return Ok(BatchOutcome::Interrupted(Box::new(interruption)));
                }
            };
            state.messages.push(message.clone());
            results.push(message);
        }

        cx.emit(TraceEvent::ToolResultsToLlm {
            agent: issuer.name().to_string(),
            results,
        })
        .await;
        Ok(BatchOutcome::Completed { handed_off })
    }

    async fn close_turn(
        &self,
        cx: &mut RunContext<'_>,
        state: &mut RunState,
        agent: &str,
        handed_off: bool,
    ) {
        if !handed_off || cx.config.handoff_consumes_turn {
            state.turn_count += 1;
        }
        discard_stale_resolutions(state);
        cx.emit(TraceEvent::TurnEnd {
            agent: agent.to_string(),
            turn: state.turn_count,
        })
        .await;
        debug!(run_id = %state.run_id, turn = state.turn_count, "turn complete");
    }

    async fn interrupt(
        &self,
        cx: &mut RunContext<'_>,
        interruption: Interruption,
        state: RunState,
    ) -> RunOutcome {
        info!(
            run_id = %state.run_id,
            interruption_id = %interruption.id,
            kind = %interruption.interruption_type(),
            call_id = %interruption.tool_call.id,
            "run suspended"
        );
        let outcome = Outcome::Interrupted {
            interruptions: vec![interruption],
        };
        self.finish(cx, outcome, state).await
    }

    async fn finish(&self, cx: &mut RunContext<'_>, outcome: Outcome, state: RunState) -> RunOutcome {
        match &outcome {
            Outcome::Error { error } => {
                warn!(run_id = %state.run_id, kind = %error.kind, detail = %error.detail, "run failed")
            }
            Outcome::Completed { .. } => {
                info!(run_id = %state.run_id, turn = state.turn_count, "run completed")
            }
            Outcome::Interrupted { .. } => {}
        }
        cx.emit(TraceEvent::RunEnd {
            status: outcome.status(),
            turn: state.turn_count,
        })
        .await;
        RunOutcome {
            outcome,
            final_state: state,
            usage: std::mem::take(&mut cx.usage),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("agents", &self.catalogue.names())
            .field("backend", &self.backend.name())
            .field("guardrail", &self.guardrail)
            .field("before_tool", &self.before_tool.is_some())
            .finish()
    }
}

impl RunContext<'_> {
    async fn emit(&self, event: TraceEvent) {
        self.emitter.emit(event).await;
    }
}

fn requested_event(interruption: &Interruption) -> TraceEvent {
    let interruption_id = interruption.id.clone();
    let tool_call_id = interruption.tool_call.id.clone();
    match &interruption.kind {
        InterruptionKind::Clarification {
            question, options, ..
        } => TraceEvent::ClarificationRequested {
            interruption_id,
            tool_call_id,
            question: question.clone(),
            options: options.clone(),
        },
        InterruptionKind::Elicitation { request, .. } => TraceEvent::ElicitationRequested {
            interruption_id,
            tool_call_id,
            message: request.message.clone(),
        },
        InterruptionKind::ToolAuth {
            authorization_url, ..
        } => TraceEvent::AuthorizationRequired {
            interruption_id,
            tool_call_id,
            authorization_url: authorization_url.clone(),
        },
    }
}

fn discard_stale_resolutions(state: &mut RunState) {
    if state.pending_resolutions.is_empty() {
        return;
    }
    let ids: Vec<&str> = state.pending_resolutions.keys().map(String::as_str).collect();
    warn!(run_id = %state.run_id, ?ids, "discarding resolutions with no paused tool call");
    state.pending_resolutions.clear();
}

fn duplicate_call_id(calls: &[ToolCall]) -> Option<&str> {
    let mut seen = HashSet::new();
    calls
        .iter()
        .find(|call| !seen.insert(call.id.as_str()))
        .map(|call| call.id.as_str())
}

fn parse_structured_output(
    content: &str,
    schema: &serde_json::Value,
) -> Result<serde_json::Value, String> {
    let value: serde_json::Value = serde_json::from_str(strip_code_fences(content))
        .map_err(|err| format!("output is not valid JSON: {err}"))?;
    validate_value(&value, schema)?;
    Ok(value)
}
