//! Streaming mode: the same events as buffered mode, pulled one at a time.

use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::RunConfig;
use crate::types::RunState;

use super::emitter::RunEventEmitter;
use super::events::EngineEvent;
use super::runner::Engine;
use super::types::RunOutcome;

/// One item of a streamed run: every event in order, then the outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(EngineEvent),
    Outcome(Box<RunOutcome>),
}

impl StreamItem {
    pub fn event(&self) -> Option<&EngineEvent> {
        match self {
            Self::Event(event) => Some(event),
            Self::Outcome(_) => None,
        }
    }

    pub fn into_outcome(self) -> Option<RunOutcome> {
        match self {
            Self::Outcome(outcome) => Some(*outcome),
            Self::Event(_) => None,
        }
    }
}

/// Lazily produced, finite sequence of run items.
pub type RunEventStream = BoxStream<'static, StreamItem>;

impl Engine {
    /// Run (or resume) a conversation as a pull-based stream.
    ///
    /// The loop advances only as items are pulled. Dropping the stream stops
    /// the run at its next model call, guardrail check or tool dispatch; a
    /// tool already executing runs to completion.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime; the run is spawned as a task.
    pub fn run_streamed(&self, state: RunState, config: RunConfig) -> RunEventStream {
        let (tx, mut rx) = mpsc::channel::<EngineEvent>(1);
        let engine = self.clone();
        let run_id = state.run_id;
        let handle = tokio::spawn(async move {
            let emitter = RunEventEmitter::channel(state.run_id, state.trace_id.clone(), tx)
                .with_metadata(config.metadata.clone());
            engine.drive(state, &config, &emitter).await
        });

        Box::pin(async_stream::stream! {
            while let Some(event) = rx.recv().await {
                yield StreamItem::Event(event);
            }
            match handle.await {
                Ok(Ok(outcome)) => {
                    yield StreamItem::Outcome(Box::new(outcome));
                }
                Ok(Err(_)) => debug!(%run_id, "streamed run cancelled"),
                Err(err) => warn!(%run_id, error = %err, "streamed run task failed"),
            }
        })
    }
}
