use std::time::Duration;
use tracing::info;

/// Estimated token usage of one relayed call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub media_items: u32,
}

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`chars / 4`, rounded up); the upstream reports
/// no usage of its own.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Estimate input tokens over a prompt and its flattened conversation parts.
#[must_use]
pub fn estimate_prompt_tokens<'a, I>(parts: I) -> u64
where
    I: IntoIterator<Item = &'a str>,
{
    parts.into_iter().map(estimate_tokens).sum()
}

/// Log usage for a completed call.
pub fn log_request_usage(model: &str, usage: &RelayUsage, duration: Duration) {
    info!(
        model = %model,
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        media_items = usage.media_items,
        duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        "relay call complete"
    );
}
