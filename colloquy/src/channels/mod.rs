//! State merge semantics for graph execution.
//!
//! By default a node's return value replaces the previous state. A
//! [`FieldBasedUpdater`] implements custom per-field merge logic; the
//! workflow installs one that appends to its audit logs and overrides
//! everything else (see `crate::state::workflow_state_updater`).

use std::fmt::Debug;
use std::sync::Arc;

/// Controls how a node's output is merged into the current state.
pub trait StateUpdater<S>: Send + Sync + Debug
where
    S: Clone + Send + Sync + Debug + 'static,
{
    /// Called after each node execution with the node's output.
    fn apply_update(&self, current: &mut S, update: &S);
}

/// Default updater: the node's return value replaces the state.
#[derive(Debug, Clone, Default)]
pub struct ReplaceUpdater;

impl<S> StateUpdater<S> for ReplaceUpdater
where
    S: Clone + Send + Sync + Debug + 'static,
{
    fn apply_update(&self, current: &mut S, update: &S) {
        *current = update.clone();
    }
}

/// Updater that applies updates through a merge function, allowing different
/// fields to follow different strategies (append vs. replace).
pub struct FieldBasedUpdater<S> {
    merge: Box<dyn Fn(&mut S, &S) + Send + Sync>,
}

impl<S> FieldBasedUpdater<S> {
    pub fn new(merge: impl Fn(&mut S, &S) + Send + Sync + 'static) -> Self {
        Self {
            merge: Box::new(merge),
        }
    }
}

impl<S> Debug for FieldBasedUpdater<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldBasedUpdater")
            .field("merge", &"<fn>")
            .finish()
    }
}

impl<S> StateUpdater<S> for FieldBasedUpdater<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    fn apply_update(&self, current: &mut S, update: &S) {
        (self.merge)(current, update);
    }
}

/// Shared, type-erased updater handle stored by the compiled graph.
pub type BoxedStateUpdater<S> = Arc<dyn StateUpdater<S>>;
