use serde_json::Value;

/// A classified inbound message from the remote endpoint.
///
/// Two shapes are distinguished: incremental transcript fragments, and
/// everything else. Fragments are deltas, not cumulative text; callers
/// that want history accumulate fragments themselves.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// An incremental transcript fragment.
    TranscriptDelta(String),
    /// Any other structured server event.
    Server(Value),
}

/// Parse and classify one raw data-channel frame.
///
/// Returns `None` for frames that are not valid JSON; those are dropped by
/// the caller. The remote stream interleaves non-JSON framing in some
/// transports, so a parse failure is not an error.
pub fn classify(raw: &[u8]) -> Option<InboundEvent> {
    let value: Value = serde_json::from_slice(raw).ok()?;

    if let Some(delta) = transcript_delta(&value) {
        return Some(InboundEvent::TranscriptDelta(delta.to_string()));
    }

    Some(InboundEvent::Server(value))
}

/// Transcript fragments arrive as `{"type": "...transcript.delta", "delta": "..."}`.
fn transcript_delta(value: &Value) -> Option<&str> {
    let kind = value.get("type")?.as_str()?;
    if !kind.ends_with("transcript.delta") {
        return None;
    }
    value.get("delta")?.as_str()
}
