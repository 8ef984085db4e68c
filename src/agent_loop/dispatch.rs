//! Tool dispatch: resolve one call by name, apply the argument hook,
//! validate, execute, and classify the outcome.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::agent::Agent;
use crate::config::RunConfig;
use crate::error::ErrorKind;
use crate::interruption::{Resolution, Suspension};
use crate::tools::{ToolArguments, ToolError, ToolExecutionContext};
use crate::types::{RunId, RunState, ToolCall};
use crate::util::text::stringify_value;

use super::emitter::RunEventEmitter;
use super::events::TraceEvent;

/// What the argument hook sees before a resolved tool runs.
#[derive(Debug, Clone, Copy)]
pub struct ToolInterception<'a> {
    pub run_id: RunId,
    pub agent: &'a str,
    pub tool_call: &'a ToolCall,
    /// Caller-defined context from the run state.
    pub context: &'a serde_json::Value,
}

/// Synchronous hook that may replace a call's arguments. `None` keeps them.
pub type BeforeToolHook =
    Arc<dyn Fn(&ToolInterception<'_>) -> Option<serde_json::Value> + Send + Sync>;

/// Result of dispatching a single call.
#[derive(Debug)]
pub(crate) enum ToolOutcome {
    /// A tool-result message body; `is_error` marks a soft failure.
    Finished { content: String, is_error: bool },
    /// The call named one of the agent's handoff tools.
    Handoff { target: String, content: String },
    Suspended(Suspension),
}

fn soft_failure(kind: ErrorKind, message: impl Into<String>) -> serde_json::Value {
    json!({
        "error": message.into(),
        "kind": kind,
    })
}

pub(crate) struct ToolDispatcher<'a> {
    pub(crate) before_tool: Option<&'a BeforeToolHook>,
    pub(crate) emitter: &'a RunEventEmitter,
    pub(crate) config: &'a RunConfig,
}

impl ToolDispatcher<'_> {
    /// Dispatch `call` against `agent`'s tools.
    ///
    /// `resolution` is supplied only when re-invoking the call that
    /// previously suspended.
    pub(crate) async fn dispatch(
        &self,
        call: &ToolCall,
        agent: &Agent,
        state: &RunState,
        resolution: Option<Resolution>,
    ) -> ToolOutcome {
        let Some(tool) = agent.find_tool(&call.name) else {
            if let Some(target) = agent.handoff_target(&call.name) {
                let content = json!({ "assistant": target }).to_string();
                return ToolOutcome::Handoff {
                    target: target.to_string(),
                    content,
                };
            }
            warn!(
                run_id = %state.run_id,
                agent = agent.name(),
                tool = %call.name,
                call_id = %call.id,
                "tool not found"
            );
            let result = soft_failure(
                ErrorKind::ToolNotFound,
                format!("Tool '{}' not found", call.name),
            );
            self.emit_start(call, &call.arguments).await;
            return self
                .finish(call, result, Some(ErrorKind::ToolNotFound))
                .await;
        };

        let original = call.arguments.clone();
        let arguments = self
            .before_tool
            .and_then(|hook| {
                hook(&ToolInterception {
                    run_id: state.run_id,
                    agent: agent.name(),
                    tool_call: call,
                    context: &state.context,
                })
            })
            .unwrap_or_else(|| original.clone());
        let modified = arguments != original;
        self.emitter
            .emit(TraceEvent::BeforeToolExecution {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                original_arguments: original,
                arguments: arguments.clone(),
                modified,
            })
            .await;

        self.emit_start(call, &arguments).await;

        if self.config.validate_tool_arguments {
            if let Err(err) =
                crate::tools::validation::validate_arguments(&arguments, &tool.parameters().schema)
            {
                warn!(tool = %call.name, call_id = %call.id, error = %err, "tool arguments rejected");
                let result = soft_failure(
                    ErrorKind::ToolExecutionError,
                    format!("Argument validation failed: {err}"),
                );
                return self
                    .finish(call, result, Some(ErrorKind::ToolExecutionError))
                    .await;
            }
        }

        let ctx = ToolExecutionContext {
            run_id: state.run_id,
            trace_id: state.trace_id.clone(),
            agent: agent.name().to_string(),
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            context: state.context.clone(),
            resolution,
        };
        let args = ToolArguments::new(arguments);
        let tool = Arc::clone(tool);
        debug!(tool = %call.name, call_id = %call.id, resumed = ctx.resolution.is_some(), "executing tool");

        // Spawned so a call already in flight finishes even if the run is abandoned.
        let handle = tokio::spawn(async move { tool.execute(&args, &ctx).await });
        match handle.await {
            Ok(Ok(value)) => self.finish(call, value, None).await,
            Ok(Err(ToolError::Suspend(suspension))) => {
                debug!(tool = %call.name, call_id = %call.id, kind = %suspension.kind(), "tool suspended");
                ToolOutcome::Suspended(suspension)
            }
            Ok(Err(ToolError::Failed(message))) => {
                warn!(tool = %call.name, call_id = %call.id, error = %message, "tool failed");
                let result = soft_failure(ErrorKind::ToolExecutionError, message);
                self.finish(call, result, Some(ErrorKind::ToolExecutionError))
                    .await
            }
            Err(join_err) => {
                warn!(tool = %call.name, call_id = %call.id, error = %join_err, "tool task aborted");
                let result = soft_failure(
                    ErrorKind::ToolExecutionError,
                    format!("Tool '{}' panicked", call.name),
                );
                self.finish(call, result, Some(ErrorKind::ToolExecutionError))
                    .await
            }
        }
    }

    async fn emit_start(&self, call: &ToolCall, arguments: &serde_json::Value) {
        self.emitter
            .emit(TraceEvent::ToolCallStart {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments: arguments.clone(),
            })
            .await;
    }

    async fn finish(
        &self,
        call: &ToolCall,
        result: serde_json::Value,
        error_kind: Option<ErrorKind>,
    ) -> ToolOutcome {
        let is_error = error_kind.is_some();
        let content = stringify_value(&result);
        self.emitter
            .emit(TraceEvent::ToolCallEnd {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                result,
                is_error,
                error_kind,
            })
            .await;
        ToolOutcome::Finished { content, is_error }
    }
}
