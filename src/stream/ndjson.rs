use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use pin_project_lite::pin_project;
use serde_json::Value;

use super::{NormalizedEvent, UpstreamFrame};
use crate::transport::classify::is_rate_limit_message;

pin_project! {
    /// Splits an upstream body into newline-delimited JSON documents.
    ///
    /// Bytes are buffered until a `\n` arrives, so multi-byte characters split
    /// across chunks are reassembled before parsing. A body error ends the
    /// stream with a non-rate-limited error frame.
    pub struct NdjsonDecoder<S> {
        #[pin]
        inner: S,
        buffer: Vec<u8>,
        pending: VecDeque<UpstreamFrame>,
        finished: bool,
    }
}

impl<S> NdjsonDecoder<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(4096),
            pending: VecDeque::new(),
            finished: false,
        }
    }
}

impl<S, E> Stream for NdjsonDecoder<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    type Item = UpstreamFrame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if let Some(frame) = this.pending.pop_front() {
                return Poll::Ready(Some(frame));
            }
            if *this.finished {
                return Poll::Ready(None);
            }

            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => {
                    this.buffer.extend_from_slice(&chunk);
                    drain_complete_lines(this.buffer, this.pending);
                }
                Some(Err(err)) => {
                    *this.finished = true;
                    this.buffer.clear();
                    this.pending
                        .push_back(UpstreamFrame::transport_error(format!(
                            "upstream stream interrupted: {err}"
                        )));
                }
                None => {
                    *this.finished = true;
                    let tail = std::mem::take(this.buffer);
                    if let Some(frame) = decode_line(&tail) {
                        this.pending.push_back(frame);
                    }
                }
            }
        }
    }
}

fn drain_complete_lines(buffer: &mut Vec<u8>, out: &mut VecDeque<UpstreamFrame>) {
    let mut start = 0;
    while let Some(offset) = memchr::memchr(b'\n', &buffer[start..]) {
        let end = start + offset;
        if let Some(frame) = decode_line(&buffer[start..end]) {
            out.push_back(frame);
        }
        start = end + 1;
    }
    if start > 0 {
        buffer.drain(..start);
    }
}

/// Decode one line. Blank, non-JSON and non-object lines yield `None`.
#[must_use]
pub fn decode_line(line: &[u8]) -> Option<UpstreamFrame> {
    let line = line.trim_ascii();
    if line.is_empty() || line[0] != b'{' {
        return None;
    }
    let value: Value = serde_json::from_slice(line).ok()?;
    if !value.is_object() {
        return None;
    }
    let event = classify_value(&value);
    Some(UpstreamFrame { value, event })
}

fn classify_value(value: &Value) -> Option<NormalizedEvent> {
    if let Some(error) = value
        .get("error")
        .or_else(|| value.pointer("/result/error"))
        .filter(|e| !e.is_null())
    {
        return Some(error_event(error));
    }

    let response = value.pointer("/result/response")?;

    if let Some(image) = response.get("streamingImageGenerationResponse") {
        return Some(NormalizedEvent::Progress {
            index: u32_field(image, "imageIndex"),
            percent: u32_field(image, "progress").min(100),
        });
    }
    if let Some(video) = response.get("streamingVideoGenerationResponse") {
        return Some(NormalizedEvent::Progress {
            index: 0,
            percent: u32_field(video, "progress").min(100),
        });
    }
    if response.get("modelResponse").is_some() || response.get("finalMetadata").is_some() {
        return Some(NormalizedEvent::Complete);
    }

    let token = response.get("token").and_then(Value::as_str)?;
    let thinking = response
        .get("isThinking")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if token.is_empty() || thinking {
        return None;
    }
    Some(NormalizedEvent::TextDelta {
        text: token.to_string(),
    })
}

fn error_event(error: &Value) -> NormalizedEvent {
    let message = match error {
        Value::String(text) => text.clone(),
        _ => error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("upstream error")
            .to_string(),
    };
    let code_is_429 = match error.get("code") {
        Some(Value::Number(n)) => n.as_u64() == Some(429),
        Some(Value::String(s)) => s == "429",
        _ => false,
    };
    let rate_limited = code_is_429 || is_rate_limit_message(&message);
    NormalizedEvent::Error {
        message,
        rate_limited,
    }
}

fn u32_field(value: &Value, key: &str) -> u32 {
    value
        .get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
        .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX))
}
