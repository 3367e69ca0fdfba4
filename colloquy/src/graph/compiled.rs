//! Executable graph: drives nodes from START to END, merging state and
//! emitting transition events.
//!
//! Nodes run strictly sequentially; any parallelism (critic analyzers,
//! alternative retrievals) is internal to a node. After every node the
//! updated state is checkpointed under the run's session id so streaming
//! consumers can query partial progress.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::channels::BoxedStateUpdater;
use crate::error::AgentError;
use crate::graph::conditional::NextEntry;
use crate::graph::node::Node;
use crate::graph::run_context::RunContext;
use crate::graph::state_graph::END;
use crate::graph::Next;
use crate::memory::{Checkpointer, RunnableConfig};
use crate::stream::StreamEvent;

/// Backstop against routing bugs; the debate loop is bounded well below this.
const MAX_STEPS: usize = 64;

/// Compiled, immutable graph ready for `invoke` / `stream`.
pub struct CompiledStateGraph<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    first_node_id: String,
    next_map: HashMap<String, NextEntry<S>>,
    state_updater: BoxedStateUpdater<S>,
    checkpointer: Option<Arc<dyn Checkpointer<S>>>,
}

impl<S> Debug for CompiledStateGraph<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledStateGraph")
            .field("first_node_id", &self.first_node_id)
            .finish_non_exhaustive()
    }
}

impl<S> CompiledStateGraph<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    pub(crate) fn new(
        nodes: HashMap<String, Arc<dyn Node<S>>>,
        first_node_id: String,
        next_map: HashMap<String, NextEntry<S>>,
        state_updater: BoxedStateUpdater<S>,
        checkpointer: Option<Arc<dyn Checkpointer<S>>>,
    ) -> Self {
        Self {
            nodes,
            first_node_id,
            next_map,
            state_updater,
            checkpointer,
        }
    }

    /// Runs the graph to completion and returns the final state.
    pub async fn invoke(&self, state: S, config: RunnableConfig) -> Result<S, AgentError> {
        self.run_inner(state, config, None).await
    }

    /// Runs the graph, emitting [`StreamEvent`]s on `tx` as it goes: task
    /// start/end per node, an update after each node, message chunks and
    /// custom payloads from the nodes themselves, and a final values event.
    pub async fn stream(
        &self,
        state: S,
        config: RunnableConfig,
        tx: mpsc::Sender<StreamEvent<S>>,
    ) -> Result<S, AgentError> {
        self.run_inner(state, config, Some(tx)).await
    }

    async fn run_inner(
        &self,
        initial: S,
        config: RunnableConfig,
        tx: Option<mpsc::Sender<StreamEvent<S>>>,
    ) -> Result<S, AgentError> {
        let mut state = initial;
        let mut current = self.first_node_id.clone();

        for _step in 0..MAX_STEPS {
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| AgentError::Fatal(format!("unknown node: {current}")))?;

            if let Some(ref tx) = tx {
                let _ = tx
                    .send(StreamEvent::TaskStart {
                        node_id: current.clone(),
                    })
                    .await;
            }

            let mut ctx = RunContext::new(config.clone());
            if let Some(ref tx) = tx {
                ctx = ctx.with_stream(tx.clone());
            }

            let started = Instant::now();
            let (updated, next) = match node.run(state.clone(), &ctx).await {
                Ok(out) => out,
                Err(e) => {
                    if let Some(ref tx) = tx {
                        let _ = tx
                            .send(StreamEvent::TaskEnd {
                                node_id: current.clone(),
                                result: Err(e.to_string()),
                            })
                            .await;
                    }
                    return Err(e);
                }
            };
            self.state_updater.apply_update(&mut state, &updated);
            debug!(node = %current, elapsed_ms = started.elapsed().as_millis() as u64, "node completed");

            if let Some(ref tx) = tx {
                let _ = tx
                    .send(StreamEvent::TaskEnd {
                        node_id: current.clone(),
                        result: Ok(()),
                    })
                    .await;
                let _ = tx
                    .send(StreamEvent::Updates {
                        node_id: current.clone(),
                        state: state.clone(),
                    })
                    .await;
            }

            if let Some(ref cp) = self.checkpointer {
                if config.session_id.is_some() {
                    if let Err(e) = cp.put(&config, &state).await {
                        warn!(node = %current, error = %e, "checkpoint save failed");
                    }
                }
            }

            let target = match next {
                Next::End => None,
                Next::Node(id) if id == END => None,
                Next::Node(id) => Some(id),
                Next::Continue => match self.next_map.get(&current) {
                    None => None,
                    Some(NextEntry::Unconditional(t)) if t == END => None,
                    Some(NextEntry::Unconditional(t)) => Some(t.clone()),
                    Some(NextEntry::Conditional(router)) => {
                        let t = router.resolve(&state);
                        if t == END {
                            None
                        } else {
                            Some(t)
                        }
                    }
                },
            };

            match target {
                None => {
                    if let Some(ref tx) = tx {
                        let _ = tx.send(StreamEvent::Values(state.clone())).await;
                    }
                    return Ok(state);
                }
                Some(id) => {
                    if !self.nodes.contains_key(&id) {
                        return Err(AgentError::Fatal(format!("route to unknown node: {id}")));
                    }
                    current = id;
                }
            }
        }

        Err(AgentError::Fatal(format!(
            "graph exceeded {MAX_STEPS} steps without reaching END"
        )))
    }
}
