//! One step of the workflow graph.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::AgentError;

use super::{Next, RunContext};

/// A graph node: consumes the state, returns the updated state plus routing.
///
/// Unlike a bare state transformer, a node always receives the run's
/// [`RunContext`] — every agent in this engine emits progress ticks through
/// it, and the reporter forwards content chunks over its stream channel.
/// Direct invocation outside a graph uses [`RunContext::detached`].
///
/// Routing: `Next::Continue` follows the declared edges (including the
/// moderator's conditional edge), `Next::Node(id)` jumps, `Next::End`
/// finishes the run with the returned state.
#[async_trait]
pub trait Node<S>: Send + Sync
where
    S: Clone + Send + Sync + Debug + 'static,
{
    /// Unique id within the graph; doubles as the `stage` name on events.
    fn id(&self) -> &str;

    /// Executes the node against the current state.
    async fn run(&self, state: S, ctx: &RunContext<S>) -> Result<(S, Next), AgentError>;
}
