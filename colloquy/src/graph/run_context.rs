//! Run context handed to nodes: session config plus the run's event channel.

use std::fmt::Debug;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::memory::RunnableConfig;
use crate::stream::StreamEvent;

/// Per-run context handed to every `Node::run` call.
///
/// Holds the session config and, when the run was started with `stream`, the
/// sender for the run's event channel. Progress emission is non-blocking:
/// `emit_custom` uses `try_send` so a slow consumer never stalls a node;
/// content chunks go through `stream_tx` directly (see
/// [`crate::stream::ChunkToStreamSender`]) because they must not be dropped.
pub struct RunContext<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    pub config: RunnableConfig,
    pub stream_tx: Option<mpsc::Sender<StreamEvent<S>>>,
}

impl<S> RunContext<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    pub fn new(config: RunnableConfig) -> Self {
        Self {
            config,
            stream_tx: None,
        }
    }

    /// Context for invoking a node directly, outside any graph run: no
    /// session, no event channel (progress ticks are dropped).
    pub fn detached() -> Self {
        Self::new(RunnableConfig::default())
    }

    pub fn with_stream(mut self, tx: mpsc::Sender<StreamEvent<S>>) -> Self {
        self.stream_tx = Some(tx);
        self
    }

    /// True when the run is streaming and events will be observed.
    pub fn is_streaming(&self) -> bool {
        self.stream_tx.is_some()
    }

    /// Emits a custom JSON payload (progress tick). Returns whether the event
    /// was accepted; a full channel or non-streaming run drops it silently.
    pub fn emit_custom(&self, value: Value) -> bool {
        match &self.stream_tx {
            Some(tx) => tx.try_send(StreamEvent::Custom(value)).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Custom events reach the channel when streaming, and are
    /// dropped without error when not.
    #[tokio::test]
    async fn emit_custom_respects_streaming() {
        let ctx: RunContext<String> = RunContext::detached();
        assert!(!ctx.emit_custom(serde_json::json!({"stage": "x"})));

        let (tx, mut rx) = mpsc::channel::<StreamEvent<String>>(4);
        let ctx = RunContext::new(RunnableConfig::default()).with_stream(tx);
        assert!(ctx.emit_custom(serde_json::json!({"stage": "retrieve"})));
        match rx.recv().await {
            Some(StreamEvent::Custom(v)) => assert_eq!(v["stage"], "retrieve"),
            other => panic!("expected custom event, got {other:?}"),
        }
    }
}
