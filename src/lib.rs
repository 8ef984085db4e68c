//! Parley: turn-based agent execution engine.
//!
//! Drives a conversation between a model backend, a catalogue of agents and
//! their tools, and a suspend/resume boundary for tools that need a human:
//! authorization challenges, structured input (elicitation) and
//! disambiguation (clarification).
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use parley::prelude::*;
//!
//! # async fn example(backend: Arc<dyn ModelBackend>) -> parley::error::Result<()> {
//! let catalogue = AgentCatalogue::new()
//!     .with_agent(Agent::new("assistant").with_instructions("Be brief."))?;
//! let engine = Engine::new(catalogue, backend);
//!
//! let state = RunState::new("assistant").with_user_message("hi");
//! let outcome = engine.run(state, &RunConfig::load()?).await;
//! match outcome.outcome {
//!     Outcome::Completed { output } => println!("{output}"),
//!     Outcome::Error { error } => eprintln!("{error}"),
//!     Outcome::Interrupted { interruptions } => {
//!         // persist, collect a resolution, then run again with
//!         // `final_state.with_resolution(id, resolution)`
//!         let _ = interruptions;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod agent_loop;
pub mod backend;
pub mod config;
pub mod error;
pub mod guardrail;
pub mod interruption;
pub mod prelude;
pub mod tools;
pub mod types;
pub mod util;
