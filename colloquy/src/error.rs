//! Engine error taxonomy.
//!
//! Rate-limit/quota responses are deliberately **not** an error variant: the
//! LLM layer returns them inline as user-visible text (see `crate::llm`), so
//! only failures that change control flow appear here.

use std::time::Duration;

use thiserror::Error;

/// Error for agent nodes, graph execution, and the LLM layer.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Vector store unreachable. The retrieval chain degrades this to an
    /// empty-result, quality-zero outcome; it is fatal nowhere else.
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// Transient provider failure (5xx, overloaded). Eligible for retry with
    /// exponential backoff.
    #[error("transient llm error: {0}")]
    Transient(String),

    /// A call exceeded its deadline. Treated as a node failure on LLM calls
    /// and as a failed alternative on parallel retrieval.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// LLM output did not match the expected structure. Agents degrade to a
    /// conservative fallback instead of propagating this where possible.
    #[error("parse: {0}")]
    Parse(String),

    /// A graph node failed irrecoverably.
    #[error("{node}: {message}")]
    Node { node: String, message: String },

    /// Anything else that must surface to the caller.
    #[error("{0}")]
    Fatal(String),
}

impl AgentError {
    pub fn node(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Node {
            node: node.into(),
            message: message.into(),
        }
    }

    /// True for failures the retry policy may re-attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Short machine-oriented kind for the terminal error frame.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RetrievalUnavailable(_) => "RetrievalUnavailable",
            Self::Transient(_) => "LLMTransientError",
            Self::Timeout(_) => "Timeout",
            Self::Parse(_) => "ParseError",
            Self::Node { .. } => "AgentError",
            Self::Fatal(_) => "FatalError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Only `Transient` is retryable.
    #[test]
    fn only_transient_is_retryable() {
        assert!(AgentError::Transient("503".into()).is_transient());
        assert!(!AgentError::Fatal("bad key".into()).is_transient());
        assert!(!AgentError::Timeout(Duration::from_secs(30)).is_transient());
        assert!(!AgentError::node("critic", "boom").is_transient());
    }

    /// **Scenario**: Node errors display as `node: message`.
    #[test]
    fn node_error_display() {
        let e = AgentError::node("strategist", "response too short");
        assert_eq!(e.to_string(), "strategist: response too short");
        assert_eq!(e.kind(), "AgentError");
    }
}
