pub mod anthropic;
pub(crate) mod error_shapes;
pub mod openai_media;

use crate::config::Modality;

/// Client-facing wire protocol of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngressApi {
    /// OpenAI-style media endpoints with named SSE events.
    OpenAiMedia,
    /// Anthropic-style messages.
    Anthropic,
}

/// Everything an encoder needs besides the events themselves.
///
/// Encoders read the clock and id generators only through this value, so the
/// same context and event sequence always render the same bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
    pub id: String,
    pub model: String,
    pub prompt: String,
    pub target: u32,
    pub modality: Modality,
    pub aspect_ratio: String,
    pub created: u64,
    pub input_tokens: u64,
}
