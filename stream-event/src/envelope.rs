//! Envelope (session_id, event_id) injected into status frames.
//!
//! Content chunks are left bare so the consumer-side concatenation contract
//! stays minimal; status frames gain the session id and a monotonically
//! increasing per-stream sequence number.

use serde_json::Value;

/// Envelope fields added to a status frame.
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    /// Session id; constant within one run.
    pub session_id: Option<String>,
    /// Per-stream sequence number; monotonically increasing.
    pub event_id: Option<u64>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_event_id(mut self, id: u64) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Merges envelope fields into the given JSON object (top level only).
    /// Existing keys are not overwritten.
    pub fn inject_into(&self, value: &mut Value) {
        let Some(obj) = value.as_object_mut() else {
            return;
        };
        if let Some(ref id) = self.session_id {
            obj.entry("session_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(id) = self.event_id {
            obj.entry("event_id")
                .or_insert_with(|| Value::Number(serde_json::Number::from(id)));
        }
    }
}

/// Per-run envelope state: session id plus the next sequence number.
pub struct EnvelopeState {
    session_id: String,
    next_event_id: u64,
}

impl EnvelopeState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            next_event_id: 1,
        }
    }

    /// Injects the envelope into a status-frame JSON value and advances the
    /// sequence counter. Content chunks should not pass through here.
    pub fn stamp(&mut self, value: &mut Value) {
        let env = Envelope::new()
            .with_session_id(self.session_id.clone())
            .with_event_id(self.next_event_id);
        self.next_event_id += 1;
        env.inject_into(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Stamping adds session_id and an increasing event_id.
    #[test]
    fn stamp_adds_envelope_and_increments() {
        let mut state = EnvelopeState::new("sess-1");
        let mut a = serde_json::json!({"status": "in_progress", "stage": "retrieve"});
        let mut b = serde_json::json!({"status": "in_progress", "stage": "strategist"});
        state.stamp(&mut a);
        state.stamp(&mut b);
        assert_eq!(a["session_id"], "sess-1");
        assert_eq!(a["event_id"], 1);
        assert_eq!(b["event_id"], 2);
    }

    /// **Scenario**: Existing keys are never overwritten by the envelope.
    #[test]
    fn inject_does_not_overwrite() {
        let mut v = serde_json::json!({"session_id": "keep-me"});
        Envelope::new()
            .with_session_id("other")
            .with_event_id(9)
            .inject_into(&mut v);
        assert_eq!(v["session_id"], "keep-me");
        assert_eq!(v["event_id"], 9);
    }

    /// **Scenario**: Non-object values are left untouched.
    #[test]
    fn inject_ignores_non_objects() {
        let mut v = serde_json::json!("plain");
        Envelope::new().with_event_id(1).inject_into(&mut v);
        assert_eq!(v, serde_json::json!("plain"));
    }
}
