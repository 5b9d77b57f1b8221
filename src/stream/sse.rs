/// Format an SSE frame with a named event type.
#[must_use]
pub fn named_sse_frame(event_type: &str, json: &str) -> String {
    let mut out = String::with_capacity(18 + event_type.len() + json.len());
    out.push_str("event: ");
    out.push_str(event_type);
    out.push('\n');
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

/// Serialize `value` and wrap it as a named SSE frame.
#[must_use]
pub fn named_sse_json(event_type: &str, value: &serde_json::Value) -> String {
    named_sse_frame(event_type, &value.to_string())
}
