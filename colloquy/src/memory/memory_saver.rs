//! In-process checkpoint store keyed by session id.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::memory::{CheckpointError, Checkpointer, RunnableConfig};

/// Latest-state-per-session store backed by a concurrent map.
///
/// Cross-session sharing is forbidden by construction: each key holds exactly
/// one session's snapshot and is removed when the run completes.
pub struct MemorySaver<S> {
    states: DashMap<String, S>,
}

impl<S> MemorySaver<S> {
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl<S> Default for MemorySaver<S> {
    fn default() -> Self {
        Self::new()
    }
}

fn session_id(config: &RunnableConfig) -> Result<&str, CheckpointError> {
    config
        .session_id
        .as_deref()
        .ok_or(CheckpointError::SessionIdRequired)
}

#[async_trait]
impl<S> Checkpointer<S> for MemorySaver<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn put(&self, config: &RunnableConfig, state: &S) -> Result<(), CheckpointError> {
        let id = session_id(config)?;
        self.states.insert(id.to_string(), state.clone());
        Ok(())
    }

    async fn get(&self, config: &RunnableConfig) -> Result<Option<S>, CheckpointError> {
        let id = session_id(config)?;
        Ok(self.states.get(id).map(|entry| entry.value().clone()))
    }

    async fn remove(&self, config: &RunnableConfig) -> Result<(), CheckpointError> {
        let id = session_id(config)?;
        self.states.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Put then get returns the snapshot; remove clears it.
    #[tokio::test]
    async fn put_get_remove_roundtrip() {
        let saver = MemorySaver::<u32>::new();
        let cfg = RunnableConfig::for_session("s1");
        saver.put(&cfg, &7).await.unwrap();
        assert_eq!(saver.get(&cfg).await.unwrap(), Some(7));
        saver.remove(&cfg).await.unwrap();
        assert_eq!(saver.get(&cfg).await.unwrap(), None);
        assert!(saver.is_empty());
    }

    /// **Scenario**: Operations without a session id are rejected.
    #[tokio::test]
    async fn missing_session_id_is_error() {
        let saver = MemorySaver::<u32>::new();
        let cfg = RunnableConfig::default();
        assert!(matches!(
            saver.put(&cfg, &1).await,
            Err(CheckpointError::SessionIdRequired)
        ));
    }

    /// **Scenario**: Sessions do not observe each other's snapshots.
    #[tokio::test]
    async fn sessions_are_isolated() {
        let saver = MemorySaver::<&'static str>::new();
        saver
            .put(&RunnableConfig::for_session("a"), &"state-a")
            .await
            .unwrap();
        saver
            .put(&RunnableConfig::for_session("b"), &"state-b")
            .await
            .unwrap();
        assert_eq!(
            saver.get(&RunnableConfig::for_session("a")).await.unwrap(),
            Some("state-a")
        );
        assert_eq!(
            saver.get(&RunnableConfig::for_session("b")).await.unwrap(),
            Some("state-b")
        );
    }
}
