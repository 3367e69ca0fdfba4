//! Streaming types for graph runs.
//!
//! Defines the internal event enum emitted while a compiled graph executes,
//! plus [`ChunkToStreamSender`], the adapter the reporter uses to forward LLM
//! token chunks into the run's event channel. The orchestrator bridges these
//! events into the wire-level `stream-event` frames.

use std::fmt::Debug;

use serde_json::Value;
use tokio::sync::mpsc;

/// One chunk of streamed message content.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageChunk {
    pub content: String,
}

/// Metadata attached to streamed message chunks.
#[derive(Clone, Debug)]
pub struct StreamMetadata {
    /// Graph node id that produced the chunk.
    pub node: String,
}

/// Event emitted while running a graph.
#[derive(Clone, Debug)]
pub enum StreamEvent<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    /// Full state snapshot after a node finishes.
    Values(S),
    /// Incremental update with the node id and state after that node.
    Updates { node_id: String, state: S },
    /// Message chunk emitted by a node (reporter streaming LLM output).
    Messages {
        chunk: MessageChunk,
        metadata: StreamMetadata,
    },
    /// Custom JSON payload (agent progress ticks).
    Custom(Value),
    /// A node began executing.
    TaskStart { node_id: String },
    /// A node finished executing.
    TaskEnd {
        node_id: String,
        result: Result<(), String>,
    },
}

/// Adapter that converts [`MessageChunk`]s into `StreamEvent::Messages` on the
/// run's event channel.
///
/// Call [`channel`](ChunkToStreamSender::channel) to get `(chunk_tx, chunk_rx)`,
/// pass `chunk_tx` to `generate_stream`, then await
/// [`forward`](ChunkToStreamSender::forward) alongside it with `tokio::join!`
/// so every chunk is forwarded before the node returns.
pub struct ChunkToStreamSender<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    stream_tx: mpsc::Sender<StreamEvent<S>>,
    node_id: String,
}

impl<S> ChunkToStreamSender<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    pub fn new(stream_tx: mpsc::Sender<StreamEvent<S>>, node_id: impl Into<String>) -> Self {
        Self {
            stream_tx,
            node_id: node_id.into(),
        }
    }

    /// Returns `(chunk_tx, chunk_rx)` sized for token streaming.
    pub fn channel(&self) -> (mpsc::Sender<MessageChunk>, mpsc::Receiver<MessageChunk>) {
        mpsc::channel::<MessageChunk>(128)
    }

    /// Forwards chunks until `chunk_rx` closes (the producer drops its sender).
    pub async fn forward(&self, mut chunk_rx: mpsc::Receiver<MessageChunk>) {
        while let Some(chunk) = chunk_rx.recv().await {
            let event = StreamEvent::Messages {
                chunk,
                metadata: StreamMetadata {
                    node: self.node_id.clone(),
                },
            };
            let _ = self.stream_tx.send(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Chunks fed to the adapter come out as Messages events in order.
    #[tokio::test]
    async fn forward_preserves_order() {
        let (stream_tx, mut stream_rx) = mpsc::channel::<StreamEvent<String>>(16);
        let sender = ChunkToStreamSender::new(stream_tx, "reporter");
        let (chunk_tx, chunk_rx) = sender.channel();

        let producer = async move {
            for part in ["a", "b", "c"] {
                chunk_tx
                    .send(MessageChunk {
                        content: part.to_string(),
                    })
                    .await
                    .unwrap();
            }
            // chunk_tx drops here, closing the channel
        };
        tokio::join!(producer, sender.forward(chunk_rx));

        let mut collected = String::new();
        while let Ok(ev) = stream_rx.try_recv() {
            if let StreamEvent::Messages { chunk, metadata } = ev {
                assert_eq!(metadata.node, "reporter");
                collected.push_str(&chunk.content);
            }
        }
        assert_eq!(collected, "abc");
    }
}
