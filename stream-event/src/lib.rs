//! Stream event protocol for engine runs: event shapes + SSE framing.
//!
//! This crate defines the wire shape of a single stream event and envelope
//! injection. It does not depend on the engine crate; the engine bridges its
//! internal graph events into [`EngineEvent`] and calls [`sse_frame`].

pub mod envelope;
pub mod event;

pub use envelope::{Envelope, EnvelopeState};
pub use event::{EngineEvent, StatusEvent};

/// Serializes one event to a single SSE frame: `data: <JSON>\n\n`.
///
/// Consumers concatenate `content` fields in arrival order to reconstruct the
/// streamed answer; structured fields arrive in dedicated status frames.
pub fn sse_frame(event: &EngineEvent) -> String {
    let json = serde_json::to_string(event).expect("event serialization is infallible");
    format!("data: {json}\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: A content event serializes to a minimal `data:` frame.
    #[test]
    fn sse_frame_wraps_content_event() {
        let frame = sse_frame(&EngineEvent::content("hel"));
        assert_eq!(frame, "data: {\"content\":\"hel\"}\n\n");
    }

    /// **Scenario**: Frames always end with the blank-line terminator.
    #[test]
    fn sse_frame_ends_with_double_newline() {
        let frame = sse_frame(&EngineEvent::error("AgentError", "strategist failed"));
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));
    }
}
