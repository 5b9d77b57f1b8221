use super::{
    media_markdown, AnthropicContentBlock, AnthropicResponse, AnthropicUsage, END_TURN,
};
use crate::observability::token_counter::estimate_tokens;
use crate::protocol::RenderContext;
use crate::relay::RelayOutcome;

/// Non-streaming message body for a completed relay call.
///
/// Media URLs are appended to the text as markdown, in delivery order.
#[must_use]
pub fn render_message(ctx: &RenderContext, outcome: &RelayOutcome) -> AnthropicResponse {
    let mut text = outcome.text.clone();
    for url in &outcome.media {
        text.push_str(&media_markdown(ctx.modality, url));
    }
    let output_tokens = estimate_tokens(&text);
    AnthropicResponse {
        id: ctx.id.clone(),
        type_: "message".to_string(),
        role: "assistant".to_string(),
        content: vec![AnthropicContentBlock::Text { text }],
        model: ctx.model.clone(),
        stop_reason: Some(END_TURN.to_string()),
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: ctx.input_tokens,
            output_tokens,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Modality;

    #[test]
    fn test_message_body_shape() {
        let ctx = RenderContext {
            id: "msg_abc".into(),
            model: "imagine".into(),
            prompt: "a fox".into(),
            target: 2,
            modality: Modality::Image,
            aspect_ratio: "1:1".into(),
            created: 0,
            input_tokens: 2,
        };
        let outcome = RelayOutcome {
            media: vec!["https://a.example/1.png".into()],
            delivered: 1,
            ..RelayOutcome::default()
        };
        let body = serde_json::to_value(render_message(&ctx, &outcome)).unwrap();
        assert_eq!(body["id"], "msg_abc");
        assert_eq!(body["type"], "message");
        assert_eq!(body["role"], "assistant");
        assert_eq!(body["content"][0]["type"], "text");
        assert_eq!(
            body["content"][0]["text"],
            "![image](https://a.example/1.png)\n"
        );
        assert_eq!(body["stop_reason"], "end_turn");
        assert!(body["stop_sequence"].is_null());
        assert_eq!(body["usage"]["input_tokens"], 2);
    }
}
