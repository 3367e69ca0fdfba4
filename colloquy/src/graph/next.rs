//! Routing value returned by a node alongside its updated state.

/// What the runner should do after a node completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    /// Follow the graph's edges (linear edge or conditional router).
    Continue,
    /// Jump directly to the named node.
    Node(String),
    /// Stop the run; the current state is final.
    End,
}
