use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use super::events::{EngineEvent, TraceEvent};
use crate::types::RunId;

/// Callback used for buffered-mode run events.
pub type RunEventSink = Arc<dyn Fn(EngineEvent) + Send + Sync>;

enum Delivery {
    Silent,
    Callback(RunEventSink),
    Channel(mpsc::Sender<EngineEvent>),
}

pub(crate) struct RunEventEmitter {
    run_id: RunId,
    trace_id: String,
    seq: AtomicU64,
    metadata: BTreeMap<String, String>,
    delivery: Delivery,
}

impl RunEventEmitter {
    fn new(run_id: RunId, trace_id: String, delivery: Delivery) -> Self {
        Self {
            run_id,
            trace_id,
            seq: AtomicU64::new(1),
            metadata: BTreeMap::new(),
            delivery,
        }
    }

    /// Labels stamped on every envelope.
    pub(crate) fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub(crate) fn silent(run_id: RunId, trace_id: String) -> Self {
        Self::new(run_id, trace_id, Delivery::Silent)
    }

    pub(crate) fn callback(run_id: RunId, trace_id: String, sink: RunEventSink) -> Self {
        Self::new(run_id, trace_id, Delivery::Callback(sink))
    }

    pub(crate) fn channel(run_id: RunId, trace_id: String, tx: mpsc::Sender<EngineEvent>) -> Self {
        Self::new(run_id, trace_id, Delivery::Channel(tx))
    }

    pub(crate) async fn emit(&self, event: TraceEvent) {
        if matches!(self.delivery, Delivery::Silent) {
            return;
        }
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let envelope = EngineEvent {
            run_id: self.run_id,
            trace_id: self.trace_id.clone(),
            seq,
            timestamp: chrono::Utc::now(),
            metadata: self.metadata.clone(),
            event,
        };
        match &self.delivery {
            Delivery::Silent => {}
            Delivery::Callback(sink) => {
                let name = envelope.event.name();
                if catch_unwind(AssertUnwindSafe(|| sink(envelope))).is_err() {
                    warn!(run_id = %self.run_id, event = name, "run event callback panicked");
                }
            }
            Delivery::Channel(tx) => {
                // receiver gone means the stream was dropped; the loop notices via is_cancelled
                let _ = tx.send(envelope).await;
            }
        }
    }

    /// True once a streaming consumer has stopped pulling.
    pub(crate) fn is_cancelled(&self) -> bool {
        match &self.delivery {
            Delivery::Channel(tx) => tx.is_closed(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn run_end() -> TraceEvent {
        TraceEvent::RunEnd {
            status: super::super::types::RunStatus::Completed,
            turn: 0,
        }
    }

    #[tokio::test]
    async fn callback_receives_sequenced_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: RunEventSink = Arc::new(move |event: EngineEvent| {
            sink_seen.lock().unwrap().push(event.seq);
        });
        let emitter = RunEventEmitter::callback(uuid::Uuid::new_v4(), "t".into(), sink);

        emitter.emit(run_end()).await;
        emitter.emit(run_end()).await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn metadata_is_stamped_on_envelopes() {
        let (tx, mut rx) = mpsc::channel(1);
        let metadata = BTreeMap::from([("tenant".to_string(), "acme".to_string())]);
        let emitter = RunEventEmitter::channel(uuid::Uuid::new_v4(), "t".into(), tx)
            .with_metadata(metadata.clone());

        emitter.emit(run_end()).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.metadata, metadata);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["metadata"]["tenant"], "acme");
        assert_eq!(value["type"], "run_end");
    }

    #[tokio::test]
    async fn buffered_delivery_never_reports_cancellation() {
        let silent = RunEventEmitter::silent(uuid::Uuid::new_v4(), "t".into());
        let sink: RunEventSink = Arc::new(|_| {});
        let callback = RunEventEmitter::callback(uuid::Uuid::new_v4(), "t".into(), sink);

        silent.emit(run_end()).await;
        callback.emit(run_end()).await;
        assert!(!silent.is_cancelled());
        assert!(!callback.is_cancelled());
    }

    #[tokio::test]
    async fn panicking_callback_is_contained() {
        let sink: RunEventSink = Arc::new(|_| panic!("observer bug"));
        let emitter = RunEventEmitter::callback(uuid::Uuid::new_v4(), "t".into(), sink);

        emitter.emit(run_end()).await;
        emitter.emit(run_end()).await;
    }

    #[tokio::test]
    async fn dropped_receiver_cancels() {
        let (tx, rx) = mpsc::channel(1);
        let emitter = RunEventEmitter::channel(uuid::Uuid::new_v4(), "t".into(), tx);
        assert!(!emitter.is_cancelled());

        drop(rx);
        emitter.emit(run_end()).await;
        assert!(emitter.is_cancelled());
    }
}
