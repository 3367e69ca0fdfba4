//! Checkpointer trait and CheckpointError.
//!
//! Saves and loads the latest state snapshot per session id.
//!
//! **Interaction**: Injected at compile via
//! `StateGraph::compile_with_checkpointer`; `CompiledStateGraph` saves after
//! each node when `config.session_id` is set.

use async_trait::async_trait;

use crate::memory::RunnableConfig;

/// Error type for checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("session_id required")]
    SessionIdRequired,
    #[error("storage: {0}")]
    Storage(String),
}

/// Saves and loads the latest checkpoint per session.
///
/// Implementations: [`super::MemorySaver`] (in-process map). Streaming
/// consumers use `get` to observe partial state while a run is in flight.
#[async_trait]
pub trait Checkpointer<S>: Send + Sync
where
    S: Clone + Send + Sync + 'static,
{
    /// Persist the latest state for the session.
    async fn put(&self, config: &RunnableConfig, state: &S) -> Result<(), CheckpointError>;

    /// Load the latest state for the session, if any.
    async fn get(&self, config: &RunnableConfig) -> Result<Option<S>, CheckpointError>;

    /// Drop the session's checkpoint (called when the run's state is discarded).
    async fn remove(&self, config: &RunnableConfig) -> Result<(), CheckpointError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Display of each CheckpointError variant names its cause.
    #[test]
    fn checkpoint_error_display() {
        assert!(CheckpointError::SessionIdRequired
            .to_string()
            .contains("session_id"));
        assert!(CheckpointError::Storage("io".into())
            .to_string()
            .contains("storage"));
    }
}
