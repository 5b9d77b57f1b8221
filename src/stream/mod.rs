pub mod media;
pub mod ndjson;
pub mod sse;

pub use media::MediaExtractor;
pub use ndjson::{decode_line, NdjsonDecoder};
pub use sse::named_sse_frame;

/// Provider-agnostic event decoded from one upstream line.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedEvent {
    TextDelta { text: String },
    Progress { index: u32, percent: u32 },
    MediaFound { url: String, index: u32 },
    Complete,
    Error { message: String, rate_limited: bool },
}

/// One decoded upstream line: the parsed document plus the event it maps to.
///
/// Lines with no recognized shape still surface as frames so media references
/// nested anywhere in them can be found.
#[derive(Debug, Clone)]
pub struct UpstreamFrame {
    pub value: serde_json::Value,
    pub event: Option<NormalizedEvent>,
}

impl UpstreamFrame {
    #[must_use]
    pub fn transport_error(message: impl Into<String>) -> Self {
        Self {
            value: serde_json::Value::Null,
            event: Some(NormalizedEvent::Error {
                message: message.into(),
                rate_limited: false,
            }),
        }
    }
}
