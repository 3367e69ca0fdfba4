//! Run config: the session id that keys checkpoints for one run.

/// Config passed to `invoke`/`stream`. When `session_id` is set and the graph
/// was compiled with a checkpointer, the state is saved after every node.
#[derive(Debug, Clone, Default)]
pub struct RunnableConfig {
    pub session_id: Option<String>,
}

impl RunnableConfig {
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: The session constructor populates the id; default does not.
    #[test]
    fn for_session_sets_id() {
        assert_eq!(
            RunnableConfig::for_session("sess-1").session_id.as_deref(),
            Some("sess-1")
        );
        assert!(RunnableConfig::default().session_id.is_none());
    }
}
