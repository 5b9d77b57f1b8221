use http::StatusCode;

use super::{UpstreamError, UpstreamErrorKind};
use crate::util::contains_ascii_case_insensitive;

const ERROR_BODY_PREVIEW_CHARS: usize = 512;

#[inline]
pub(crate) fn is_rate_limit_message(message: &str) -> bool {
    const NEEDLES: [&[u8]; 8] = [
        b"rate limit",
        b"rate-limit",
        b"too many requests",
        b"resource_exhausted",
        b"resource exhausted",
        b"quota",
        b"capacity",
        b"try again later",
    ];
    let haystack = message.as_bytes();
    NEEDLES
        .iter()
        .any(|needle| contains_ascii_case_insensitive(haystack, needle))
}

#[inline]
fn is_rate_limit_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 503 | 529)
}

/// Classify a non-2xx upstream response from its status and body text.
#[must_use]
pub fn classify_status(status: StatusCode, body: &str) -> UpstreamError {
    let kind = if is_rate_limit_status(status) || is_rate_limit_message(body) {
        UpstreamErrorKind::RateLimited
    } else {
        UpstreamErrorKind::Fatal
    };
    UpstreamError::new(
        kind,
        Some(status.as_u16()),
        format!(
            "upstream returned {}: {}",
            status.as_u16(),
            error_body_preview(body)
        ),
    )
}

/// Map a client-side send failure. Timeouts are not retried on another credential.
#[must_use]
pub fn classify_send_error(err: &reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::transport(format!("upstream request timed out: {err}"))
    } else {
        classify_transport_message(format!("upstream request failed: {err}"))
    }
}

/// Transport failures whose text carries a rate-limit marker count as rate limited.
pub(crate) fn classify_transport_message(message: String) -> UpstreamError {
    if is_rate_limit_message(&message) {
        UpstreamError::new(UpstreamErrorKind::RateLimited, None, message)
    } else {
        UpstreamError::transport(message)
    }
}

fn error_body_preview(body: &str) -> String {
    let trimmed = body.trim();
    let message = serde_json::from_str::<serde_json::Value>(trimmed)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("message"))
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        });
    let text = message.unwrap_or_else(|| trimmed.to_string());
    if text.chars().count() <= ERROR_BODY_PREVIEW_CHARS {
        text
    } else {
        let mut cut: String = text.chars().take(ERROR_BODY_PREVIEW_CHARS).collect();
        cut.push('…');
        cut
    }
}
