//! Errors surfaced by `StateGraph::compile`.

use thiserror::Error;

/// Validation failures when building the executable graph.
#[derive(Debug, Error)]
pub enum CompilationError {
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("no edge from START")]
    MissingStart,
    #[error("no path to END")]
    MissingEnd,
    #[error("conditional path map references unknown node: {0}")]
    InvalidConditionalPathMap(String),
    #[error("node has both an edge and conditional edges: {0}")]
    NodeHasBothEdgeAndConditional(String),
    #[error("invalid chain: {0}")]
    InvalidChain(String),
}
