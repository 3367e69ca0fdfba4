//! Wire-level event types: status frames (tagged by `status`) and content chunks.
//!
//! Four event kinds flow to the consumer:
//! - `{status: "in_progress", stage, message, agent?, details?}` progress ticks,
//! - `{content: <chunk>}` verbatim synthesis chunks,
//! - `{status: "complete", response}` terminal success,
//! - `{status: "error", error, message}` terminal failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status-bearing frames, discriminated by the `status` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusEvent {
    InProgress {
        /// Graph stage that produced the tick (e.g. "retrieve", "critic").
        stage: String,
        /// Human-readable progress line.
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        /// Structured per-agent payload (e.g. critique severity counts).
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    Complete {
        /// Assembled final answer, tutor interaction, and run metadata.
        response: Value,
    },
    Error {
        /// Short machine-oriented error kind.
        error: String,
        /// Human-readable explanation; never a stack trace.
        message: String,
    },
}

/// One stream event: either a status frame or a raw content chunk.
///
/// `Content` carries a verbatim slice of the reporter's synthesis text; the
/// concatenation of all content chunks equals the full streamed answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EngineEvent {
    Content { content: String },
    Status(StatusEvent),
}

impl EngineEvent {
    pub fn in_progress(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Status(StatusEvent::InProgress {
            stage: stage.into(),
            message: message.into(),
            agent: None,
            details: None,
        })
    }

    pub fn in_progress_with(
        stage: impl Into<String>,
        message: impl Into<String>,
        agent: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        Self::Status(StatusEvent::InProgress {
            stage: stage.into(),
            message: message.into(),
            agent: Some(agent.into()),
            details,
        })
    }

    pub fn content(chunk: impl Into<String>) -> Self {
        Self::Content {
            content: chunk.into(),
        }
    }

    pub fn complete(response: Value) -> Self {
        Self::Status(StatusEvent::Complete { response })
    }

    pub fn error(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Status(StatusEvent::Error {
            error: error.into(),
            message: message.into(),
        })
    }

    /// True for the terminal frames (`complete` / `error`).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Status(StatusEvent::Complete { .. }) | Self::Status(StatusEvent::Error { .. })
        )
    }

    /// Serializes this event to a JSON object (no envelope).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Progress frames carry `status: in_progress` and omit absent fields.
    #[test]
    fn in_progress_serializes_with_status_tag() {
        let v = EngineEvent::in_progress("retrieve", "Performing contextual retrieval...")
            .to_value()
            .unwrap();
        assert_eq!(v["status"], "in_progress");
        assert_eq!(v["stage"], "retrieve");
        assert!(v.get("agent").is_none());
        assert!(v.get("details").is_none());
    }

    /// **Scenario**: Content frames are `{"content": ...}` with no status field.
    #[test]
    fn content_serializes_without_status() {
        let v = EngineEvent::content("abc").to_value().unwrap();
        assert_eq!(v, serde_json::json!({"content": "abc"}));
    }

    /// **Scenario**: Complete and error frames are terminal; progress and content are not.
    #[test]
    fn is_terminal_only_for_complete_and_error() {
        assert!(EngineEvent::complete(serde_json::json!({"success": true})).is_terminal());
        assert!(EngineEvent::error("AgentError", "boom").is_terminal());
        assert!(!EngineEvent::content("x").is_terminal());
        assert!(!EngineEvent::in_progress("critic", "reviewing").is_terminal());
    }

    /// **Scenario**: Events round-trip through JSON, discriminated by shape.
    #[test]
    fn events_round_trip() {
        for ev in [
            EngineEvent::content("chunk"),
            EngineEvent::in_progress_with(
                "critic",
                "Review complete",
                "critic",
                Some(serde_json::json!({"total_critiques": 2})),
            ),
            EngineEvent::complete(serde_json::json!({"success": true})),
            EngineEvent::error("Timeout", "llm call timed out"),
        ] {
            let json = serde_json::to_string(&ev).unwrap();
            let back: EngineEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(back, ev);
        }
    }
}
