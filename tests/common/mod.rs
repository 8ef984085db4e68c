//! Shared test helpers: a scripted spy backend and sample tools.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use parley::backend::{Completion, CompletionRequest, ModelBackend};
use parley::error::ParleyError;
use parley::interruption::{AuthChallenge, ElicitationRequest};
use parley::tools::{FnTool, ToolError, ToolParameters};
use parley::types::{Message, ToolCall, Usage};

/// What the backend saw on one call.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub agent: String,
    pub instructions: String,
    pub tool_names: Vec<String>,
    pub messages: Vec<Message>,
    pub turn_count: u32,
}

enum Scripted {
    Reply(Completion),
    Fail(String),
}

/// A backend that replays queued completions and records every request.
pub struct ScriptedBackend {
    name: String,
    script: Mutex<VecDeque<Scripted>>,
    fallback: Mutex<Option<Completion>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Self::named("scripted")
    }

    pub fn named(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn push(&self, item: Scripted) {
        self.script.lock().unwrap().push_back(item);
    }

    /// Queue a final text answer.
    pub fn queue_reply(&self, text: &str) {
        self.push(Scripted::Reply(
            Completion::new(Message::assistant(text)).with_usage(Usage::new(10, 20)),
        ));
    }

    /// Queue a single tool call.
    pub fn queue_tool_call(&self, id: &str, name: &str, args: serde_json::Value) {
        self.queue_tool_calls(vec![ToolCall::new(id, name, args)]);
    }

    /// Queue a batch of tool calls in one assistant message.
    pub fn queue_tool_calls(&self, calls: Vec<ToolCall>) {
        self.push(Scripted::Reply(
            Completion::new(Message::assistant_with_tool_calls("", calls))
                .with_usage(Usage::new(10, 5)),
        ));
    }

    pub fn queue_completion(&self, completion: Completion) {
        self.push(Scripted::Reply(completion));
    }

    /// Queue a backend failure.
    pub fn queue_error(&self, message: &str) {
        self.push(Scripted::Fail(message.to_string()));
    }

    /// Answer with `completion` whenever the queue is empty.
    pub fn always(&self, completion: Completion) {
        *self.fallback.lock().unwrap() = Some(completion);
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn as_backend(self: &Arc<Self>) -> Arc<dyn ModelBackend> {
        Arc::clone(self) as Arc<dyn ModelBackend>
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_completion(&self, request: CompletionRequest<'_>) -> Result<Completion, ParleyError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            agent: request.agent.name().to_string(),
            instructions: request.instructions.to_string(),
            tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
            messages: request.state.messages.clone(),
            turn_count: request.state.turn_count,
        });
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Reply(completion)) => Ok(completion),
            Some(Scripted::Fail(message)) => Err(ParleyError::provider(message)),
            None => self
                .fallback
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| ParleyError::provider("script exhausted")),
        }
    }
}

/// `add(a, b)`; counts its invocations.
pub fn add_tool(invocations: Arc<AtomicUsize>) -> FnTool {
    FnTool::new(
        "add",
        "Add two numbers",
        ToolParameters::object()
            .number("a", "First operand", true)
            .number("b", "Second operand", true)
            .build(),
        move |args, _ctx| {
            let invocations = Arc::clone(&invocations);
            async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                let sum = args.get_f64("a")? + args.get_f64("b")?;
                Ok(json!(sum as i64))
            }
        },
    )
}

/// Asks which Alice was meant until a clarification answer arrives.
pub fn find_person_tool(invocations: Arc<AtomicUsize>) -> FnTool {
    FnTool::new(
        "find_person",
        "Look up a person by name",
        ToolParameters::object()
            .string("name", "Name to look up", true)
            .build(),
        move |args, ctx| {
            let invocations = Arc::clone(&invocations);
            async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                let name = args.get_str("name")?.to_string();
                match ctx.clarification_answer() {
                    Some(answer) => Ok(json!(format!("{answer} found"))),
                    None => Err(ToolError::clarify(
                        format!("Which {name}?"),
                        ["Alice (Eng)", "Alice (Sales)"],
                    )),
                }
            }
        },
    )
}

/// Suspends for structured input; returns the submitted content once accepted.
pub fn shipping_form_tool() -> FnTool {
    FnTool::new(
        "shipping_form",
        "Collect a shipping address",
        ToolParameters::empty(),
        |_args, ctx| async move {
            match ctx.elicitation_response() {
                Some((parley::interruption::ElicitationAction::Accept, Some(content))) => {
                    Ok(content.clone())
                }
                Some((action, _)) => Err(ToolError::failed(format!("user chose {action}"))),
                None => Err(ToolError::elicit(ElicitationRequest::new(
                    "Where should we ship it?",
                    json!({
                        "type": "object",
                        "properties": { "city": { "type": "string" } },
                        "required": ["city"],
                    }),
                ))),
            }
        },
    )
}

/// Needs an OAuth callback before it can read the calendar.
pub fn calendar_tool() -> FnTool {
    FnTool::new(
        "calendar",
        "Read the user's calendar",
        ToolParameters::empty(),
        |_args, ctx| async move {
            match ctx.auth_callback() {
                Some(callback) => Ok(json!({
                    "events": 3,
                    "code": callback.get("code").cloned().unwrap_or_default(),
                })),
                None => Err(ToolError::authorize(AuthChallenge {
                    authorization_url: Some("https://auth.example/authorize".into()),
                    provider: Some("example".into()),
                    scopes: vec!["calendar.read".into()],
                })),
            }
        },
    )
}

/// Returns a fixed value; counts its invocations.
pub fn echo_tool(name: &str, value: &str, invocations: Arc<AtomicUsize>) -> FnTool {
    let value = value.to_string();
    FnTool::new(name, "Echo a fixed value", ToolParameters::empty(), move |_args, _ctx| {
        let invocations = Arc::clone(&invocations);
        let value = value.clone();
        async move {
            invocations.fetch_add(1, Ordering::SeqCst);
            Ok(json!(value))
        }
    })
}

pub fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}
