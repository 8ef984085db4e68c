//! The agent execution engine: turn loop, tool dispatch, events, streaming.

pub mod dispatch;
pub mod emitter;
pub mod events;
pub mod runner;
pub mod stream;
pub mod types;

pub use dispatch::{BeforeToolHook, ToolInterception};
pub use emitter::RunEventSink;
pub use events::{EngineEvent, TraceEvent};
pub use runner::Engine;
pub use stream::{RunEventStream, StreamItem};
pub use types::{Outcome, RunError, RunOutcome, RunStatus};
