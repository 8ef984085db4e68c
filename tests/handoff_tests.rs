//! Agent-to-agent handoffs through synthetic transfer tools.

mod common;

use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use serde_json::json;

use common::{count, counter, echo_tool, find_person_tool, ScriptedBackend};
use parley::agent::handoff_tool_name;
use parley::prelude::*;

fn support_catalogue() -> AgentCatalogue {
    AgentCatalogue::new()
        .with_agent(
            Agent::new("triage")
                .with_instructions("Route the customer.")
                .with_handoff("billing"),
        )
        .unwrap()
        .with_agent(
            Agent::new("billing")
                .with_instructions("Handle invoices and refunds.")
                .with_handoff_description("Questions about invoices and refunds"),
        )
        .unwrap()
}

#[tokio::test]
async fn handoff_switches_agent_and_counts_a_turn() {
    let backend = ScriptedBackend::new();
    backend.queue_tool_call("call_t", "transfer_to_billing", json!({}));
    backend.queue_reply("Your refund is on its way.");
    let engine = Engine::new(support_catalogue(), backend.as_backend());

    let outcome = engine
        .run(
            RunState::new("triage").with_user_message("I want a refund"),
            &RunConfig::default(),
        )
        .await;

    assert_eq!(outcome.output_text(), Some("Your refund is on its way."));
    assert_eq!(outcome.final_state.current_agent, "billing");
    assert_eq!(outcome.final_state.turn_count, 1);

    let tool_message = &outcome.final_state.messages[2];
    assert_eq!(tool_message.role, Role::Tool);
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_t"));
    let payload: serde_json::Value = serde_json::from_str(&tool_message.content).unwrap();
    assert_eq!(payload, json!({ "assistant": "billing" }));
    assert_eq!(outcome.final_state.messages[3].name.as_deref(), Some("billing"));

    let requests = backend.requests();
    assert_eq!(requests[0].agent, "triage");
    assert!(requests[0].tool_names.contains(&"transfer_to_billing".to_string()));
    assert_eq!(requests[1].agent, "billing");
    assert_eq!(requests[1].instructions, "Handle invoices and refunds.");
    assert!(requests[1].tool_names.is_empty());
}

#[tokio::test]
async fn handoff_can_be_excluded_from_the_turn_budget() {
    let backend = ScriptedBackend::new();
    backend.queue_tool_call("call_t", "transfer_to_billing", json!({}));
    backend.queue_reply("Handled.");
    let engine = Engine::new(support_catalogue(), backend.as_backend());

    // a budget of one turn would be spent by the handoff otherwise
    let config = RunConfig::default()
        .with_max_turns(1)
        .with_handoff_consumes_turn(false);
    let outcome = engine
        .run(RunState::new("triage").with_user_message("refund please"), &config)
        .await;

    assert_eq!(outcome.output_text(), Some("Handled."));
    assert_eq!(outcome.final_state.turn_count, 0);
}

#[tokio::test]
async fn counted_handoff_can_exhaust_the_budget() {
    let backend = ScriptedBackend::new();
    backend.queue_tool_call("call_t", "transfer_to_billing", json!({}));
    let engine = Engine::new(support_catalogue(), backend.as_backend());

    let outcome = engine
        .run(
            RunState::new("triage").with_user_message("refund please"),
            &RunConfig::default().with_max_turns(1),
        )
        .await;

    let error = outcome.error().expect("run should fail");
    assert_eq!(error.kind, ErrorKind::MaxTurnsExceeded);
    assert_eq!(outcome.final_state.current_agent, "billing");
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn handoff_emits_event_and_runs_the_rest_of_the_batch() {
    let backend = ScriptedBackend::new();
    backend.queue_tool_calls(vec![
        ToolCall::new("c1", "transfer_to_billing", json!({})),
        ToolCall::new("c2", "note", json!({})),
    ]);
    backend.queue_reply("done");
    let notes = counter();
    let catalogue = AgentCatalogue::new()
        .with_agent(
            Agent::new("triage")
                .with_handoff("billing")
                .with_tool(echo_tool("note", "noted", notes.clone())),
        )
        .unwrap()
        .with_agent(Agent::new("billing"))
        .unwrap();
    let engine = Engine::new(catalogue, backend.as_backend());

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = Arc::clone(&events);
    let sink: RunEventSink = Arc::new(move |event: EngineEvent| {
        sink_events.lock().unwrap().push(event.event);
    });
    let outcome = engine
        .run_with_sink(
            RunState::new("triage").with_user_message("hi"),
            &RunConfig::default(),
            sink,
        )
        .await;

    assert!(outcome.is_completed());
    assert_eq!(count(&notes), 1);
    let handoffs: Vec<(String, String, String)> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            TraceEvent::Handoff {
                from,
                to,
                tool_call_id,
            } => Some((from.clone(), to.clone(), tool_call_id.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        handoffs,
        vec![("triage".to_string(), "billing".to_string(), "c1".to_string())]
    );
}

#[tokio::test]
async fn suspension_after_handoff_resumes_against_the_issuing_agent() {
    let backend = ScriptedBackend::new();
    backend.queue_tool_calls(vec![
        ToolCall::new("c1", "transfer_to_billing", json!({})),
        ToolCall::new("c2", "find_person", json!({ "name": "Alice" })),
    ]);
    backend.queue_reply("Billing has Alice's account.");
    let lookups = counter();
    let catalogue = AgentCatalogue::new()
        .with_agent(
            Agent::new("triage")
                .with_handoff("billing")
                .with_tool(find_person_tool(lookups.clone())),
        )
        .unwrap()
        .with_agent(Agent::new("billing"))
        .unwrap();
    let engine = Engine::new(catalogue, backend.as_backend());

    let first = engine
        .run(
            RunState::new("triage").with_user_message("find Alice's invoice"),
            &RunConfig::default(),
        )
        .await;

    let interruption = first.interruptions()[0].clone();
    assert_eq!(interruption.agent, "triage");
    assert_eq!(interruption.tool_call.id, "c2");
    assert_eq!(first.final_state.current_agent, "billing");
    assert_eq!(first.final_state.turn_count, 0);

    let second = engine
        .run(
            interruption.resume_state(Resolution::clarification("Alice (Eng)")),
            &RunConfig::default(),
        )
        .await;

    assert_eq!(second.output_text(), Some("Billing has Alice's account."));
    assert_eq!(count(&lookups), 2);
    assert_eq!(second.final_state.turn_count, 1);
    let requests = backend.requests();
    assert_eq!(requests.last().map(|r| r.agent.as_str()), Some("billing"));
}

#[tokio::test]
async fn real_tool_wins_over_handoff_with_the_same_name() {
    let backend = ScriptedBackend::new();
    backend.queue_tool_call("call_t", "transfer_to_billing", json!({}));
    backend.queue_reply("stayed");
    let shadows = counter();
    let catalogue = AgentCatalogue::new()
        .with_agent(
            Agent::new("triage")
                .with_handoff("billing")
                .with_tool(echo_tool("transfer_to_billing", "local", shadows.clone())),
        )
        .unwrap()
        .with_agent(Agent::new("billing"))
        .unwrap();
    let engine = Engine::new(catalogue, backend.as_backend());

    let outcome = engine
        .run(RunState::new("triage").with_user_message("hi"), &RunConfig::default())
        .await;

    assert_eq!(outcome.output_text(), Some("stayed"));
    assert_eq!(outcome.final_state.current_agent, "triage");
    assert_eq!(count(&shadows), 1);
}

#[test]
fn handoff_tools_are_advertised_with_target_descriptions() {
    let catalogue = support_catalogue();
    let triage = catalogue.get("triage").unwrap();

    let definitions = catalogue.tool_definitions_for(&triage);
    assert_eq!(definitions.len(), 1);
    assert_eq!(definitions[0].name, "transfer_to_billing");
    assert_eq!(definitions[0].description, "Questions about invoices and refunds");
}

#[test]
fn catalogue_rejects_unknown_handoff_targets() {
    let catalogue = AgentCatalogue::new()
        .with_agent(Agent::new("triage").with_handoff("billing"))
        .unwrap();
    assert!(catalogue.validate().is_err());
    assert!(support_catalogue().validate().is_ok());
}

#[test]
fn handoff_tool_names_are_slugged() {
    assert_eq!(handoff_tool_name("Billing Team"), "transfer_to_billing_team");
    assert_eq!(handoff_tool_name("billing"), "transfer_to_billing");
}
