//! OpenAI-style media protocol: named SSE events while streaming and an
//! `images`-shaped JSON body otherwise.

use serde::Serialize;
use serde_json::{json, Value};

use super::RenderContext;
use crate::config::Modality;
use crate::relay::{RelayEvent, RelayOutcome};
use crate::stream::sse::named_sse_frame;

/// Pixel dimensions reported for an aspect ratio.
#[must_use]
pub fn dimensions_for(aspect_ratio: &str) -> (u32, u32) {
    match aspect_ratio {
        "16:9" => (1280, 720),
        "9:16" => (720, 1280),
        "3:2" => (1248, 832),
        "2:3" => (832, 1248),
        _ => (1024, 1024),
    }
}

/// Aspect ratio for an OpenAI `size` value such as `1280x720`.
#[must_use]
pub fn aspect_ratio_from_size(size: &str) -> Option<&'static str> {
    let (w, h) = size.split_once(['x', 'X'])?;
    let w: u32 = w.trim().parse().ok()?;
    let h: u32 = h.trim().parse().ok()?;
    if w == 0 || h == 0 {
        return None;
    }
    let ratio = f64::from(w) / f64::from(h);
    let known = [
        ("1:1", 1.0),
        ("16:9", 16.0 / 9.0),
        ("9:16", 9.0 / 16.0),
        ("3:2", 1.5),
        ("2:3", 2.0 / 3.0),
    ];
    known
        .iter()
        .min_by(|a, b| (a.1 - ratio).abs().total_cmp(&(b.1 - ratio).abs()))
        .map(|(name, _)| *name)
}

#[derive(Serialize)]
struct ProgressPayload {
    percentage: u32,
    index: u32,
    total: u32,
}

#[derive(Serialize)]
struct MediaPayload<'a> {
    url: &'a str,
    width: u32,
    height: u32,
    prompt: &'a str,
}

#[derive(Serialize)]
struct MessagePayload<'a> {
    message: &'a str,
}

fn frame<T: Serialize>(event_type: &str, payload: &T) -> String {
    let json = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    named_sse_frame(event_type, &json)
}

/// Render one relay event as an SSE block. Text has no representation here.
#[must_use]
pub fn encode_event(ctx: &RenderContext, event: &RelayEvent) -> Option<String> {
    match event {
        RelayEvent::Text(_) => None,
        RelayEvent::Progress { index, percent } => Some(frame(
            "progress",
            &ProgressPayload {
                percentage: *percent,
                index: *index,
                total: ctx.target,
            },
        )),
        RelayEvent::Media { url, .. } => {
            let (width, height) = dimensions_for(&ctx.aspect_ratio);
            let event_type = if ctx.modality == Modality::Video {
                "video"
            } else {
                "image"
            };
            Some(frame(
                event_type,
                &MediaPayload {
                    url,
                    width,
                    height,
                    prompt: &ctx.prompt,
                },
            ))
        }
        RelayEvent::Rotation {
            attempt,
            max,
            reason,
        } => {
            let message = format!(
                "Upstream account unavailable ({reason}); switching account (attempt {attempt}/{max})"
            );
            Some(frame("info", &MessagePayload { message: &message }))
        }
        RelayEvent::Done { .. } => Some(named_sse_frame("done", "{}")),
        RelayEvent::Failed(err) => {
            let message = err.to_string();
            Some(frame("error", &MessagePayload { message: &message }))
        }
    }
}

/// Non-streaming success body.
#[must_use]
pub fn render_response(ctx: &RenderContext, outcome: &RelayOutcome) -> Value {
    let data: Vec<Value> = outcome
        .media
        .iter()
        .map(|url| json!({ "url": url, "revised_prompt": ctx.prompt }))
        .collect();
    json!({
        "created": ctx.created,
        "data": data,
    })
}
