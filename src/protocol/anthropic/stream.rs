use super::{
    error_text, media_markdown, AnthropicContentBlock, AnthropicDelta, AnthropicMessageDeltaBody,
    AnthropicOutputUsage, AnthropicResponse, AnthropicStreamEvent, AnthropicUsage, END_TURN,
};
use crate::protocol::RenderContext;
use crate::relay::RelayEvent;
use crate::stream::sse::named_sse_frame;

/// Renders relay events into the fixed Anthropic streaming envelope.
///
/// The envelope always opens with `message_start`, `content_block_start` and
/// `ping`, and always closes with `content_block_stop`, `message_delta` and
/// `message_stop`, even when the call fails. Output tokens are estimated from
/// the characters of every delta emitted.
#[derive(Debug)]
pub struct AnthropicStreamEncoder {
    ctx: RenderContext,
    started: bool,
    closed: bool,
    output_chars: u64,
}

impl AnthropicStreamEncoder {
    #[must_use]
    pub fn new(ctx: RenderContext) -> Self {
        Self {
            ctx,
            started: false,
            closed: false,
            output_chars: 0,
        }
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Opening frames. Empty after the first call.
    pub fn start(&mut self) -> String {
        if self.started {
            return String::new();
        }
        self.started = true;
        let message = AnthropicResponse {
            id: self.ctx.id.clone(),
            type_: "message".to_string(),
            role: "assistant".to_string(),
            content: Vec::new(),
            model: self.ctx.model.clone(),
            stop_reason: None,
            stop_sequence: None,
            usage: AnthropicUsage {
                input_tokens: self.ctx.input_tokens,
                output_tokens: 0,
            },
        };
        let mut out = String::with_capacity(512);
        push_event(&mut out, &AnthropicStreamEvent::MessageStart { message });
        push_event(
            &mut out,
            &AnthropicStreamEvent::ContentBlockStart {
                index: 0,
                content_block: AnthropicContentBlock::Text {
                    text: String::new(),
                },
            },
        );
        push_event(&mut out, &AnthropicStreamEvent::Ping {});
        out
    }

    /// Frames for one relay event, opening the envelope first if needed.
    pub fn encode(&mut self, event: &RelayEvent) -> String {
        if self.closed {
            return String::new();
        }
        let mut out = self.start();
        match event {
            RelayEvent::Text(text) => self.push_delta(&mut out, text),
            RelayEvent::Media { url, .. } => {
                let text = media_markdown(self.ctx.modality, url);
                self.push_delta(&mut out, &text);
            }
            RelayEvent::Progress { .. } | RelayEvent::Rotation { .. } => {}
            RelayEvent::Done { .. } => self.push_close(&mut out),
            RelayEvent::Failed(err) => {
                let text = error_text(&err.to_string());
                self.push_delta(&mut out, &text);
                self.push_close(&mut out);
            }
        }
        out
    }

    /// Closing frames if the envelope is still open.
    pub fn finish(&mut self) -> String {
        if self.closed {
            return String::new();
        }
        let mut out = self.start();
        self.push_close(&mut out);
        out
    }

    fn push_delta(&mut self, out: &mut String, text: &str) {
        if text.is_empty() {
            return;
        }
        self.output_chars += text.chars().count() as u64;
        push_event(
            out,
            &AnthropicStreamEvent::ContentBlockDelta {
                index: 0,
                delta: AnthropicDelta::TextDelta {
                    text: text.to_string(),
                },
            },
        );
    }

    fn push_close(&mut self, out: &mut String) {
        self.closed = true;
        push_event(out, &AnthropicStreamEvent::ContentBlockStop { index: 0 });
        push_event(
            out,
            &AnthropicStreamEvent::MessageDelta {
                delta: AnthropicMessageDeltaBody {
                    stop_reason: Some(END_TURN.to_string()),
                    stop_sequence: None,
                },
                usage: AnthropicOutputUsage {
                    output_tokens: self.output_chars.div_ceil(4),
                },
            },
        );
        push_event(out, &AnthropicStreamEvent::MessageStop {});
    }
}

fn push_event(out: &mut String, event: &AnthropicStreamEvent) {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    out.push_str(&named_sse_frame(event.event_type(), &json));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Modality;
    use crate::relay::RelayError;

    fn ctx() -> RenderContext {
        RenderContext {
            id: "msg_1".into(),
            model: "chat".into(),
            prompt: "hi".into(),
            target: 1,
            modality: Modality::Text,
            aspect_ratio: "1:1".into(),
            created: 0,
            input_tokens: 3,
        }
    }

    fn event_names(output: &str) -> Vec<&str> {
        output
            .lines()
            .filter_map(|line| line.strip_prefix("event: "))
            .collect()
    }

    #[test]
    fn test_start_frames_once() {
        let mut encoder = AnthropicStreamEncoder::new(ctx());
        let start = encoder.start();
        assert_eq!(
            event_names(&start),
            ["message_start", "content_block_start", "ping"]
        );
        assert!(start.contains("\"input_tokens\":3"));
        assert!(encoder.start().is_empty());
    }

    #[test]
    fn test_failure_folds_into_delta_and_closes() {
        let mut encoder = AnthropicStreamEncoder::new(ctx());
        let mut out = encoder.encode(&RelayEvent::Text("abcd".into()));
        out.push_str(&encoder.encode(&RelayEvent::Failed(RelayError::Upstream(
            "boom".into(),
        ))));
        assert_eq!(
            event_names(&out),
            [
                "message_start",
                "content_block_start",
                "ping",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );
        assert!(out.contains(r#""text":"\n[Error: boom]""#));
        // "abcd" + "\n[Error: boom]" = 4 + 14 chars
        assert!(out.contains(r#""output_tokens":5"#));
        assert!(encoder.is_closed());
        assert!(encoder.finish().is_empty());
        assert!(encoder.encode(&RelayEvent::Text("late".into())).is_empty());
    }

    #[test]
    fn test_media_renders_markdown() {
        let mut encoder = AnthropicStreamEncoder::new(ctx());
        let out = encoder.encode(&RelayEvent::Media {
            url: "https://a.example/x.png".into(),
            index: 0,
        });
        assert!(out.contains(r#""text":"![image](https://a.example/x.png)\n""#));
    }

    #[test]
    fn test_same_events_render_identical_bytes() {
        let events = [
            RelayEvent::Text("Hel".into()),
            RelayEvent::Rotation {
                attempt: 1,
                max: 5,
                reason: "busy".into(),
            },
            RelayEvent::Text("lo".into()),
            RelayEvent::Media {
                url: "https://a.example/x.png".into(),
                index: 0,
            },
            RelayEvent::Done { delivered: 1 },
        ];
        let render = || {
            let mut encoder = AnthropicStreamEncoder::new(ctx());
            let mut out = String::new();
            for event in &events {
                out.push_str(&encoder.encode(event));
            }
            out.push_str(&encoder.finish());
            out
        };
        let first = render();
        assert_eq!(first, render());
        let names = event_names(&first);
        assert_eq!(names.iter().filter(|n| **n == "content_block_start").count(), 1);
        assert_eq!(names.iter().filter(|n| **n == "content_block_stop").count(), 1);
    }

    #[test]
    fn test_finish_without_terminal_still_closes() {
        let mut encoder = AnthropicStreamEncoder::new(ctx());
        let out = encoder.finish();
        assert_eq!(event_names(&out).last(), Some(&"message_stop"));
        assert!(out.contains(r#""stop_reason":"end_turn""#));
    }
}
