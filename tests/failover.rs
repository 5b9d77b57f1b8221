mod common;

use futures_util::StreamExt;
use genrelay::config::Modality;
use genrelay::pool::usage::UsageRecorder;
use genrelay::relay::{collect, relay, GenerationRequest, RelayContext, RelayError, RelayEvent};

use common::{model, relay_context, spawn_upstream, CLIENT_KEY_ID};

async fn run(ctx: RelayContext, request: GenerationRequest) -> Vec<RelayEvent> {
    relay(ctx, request).collect().await
}

fn image_request(target: u32) -> GenerationRequest {
    let mut request = GenerationRequest::new(model("imagine", Modality::Image), "a red fox");
    request.target = target;
    request
}

fn text_request() -> GenerationRequest {
    GenerationRequest::new(model("chat", Modality::Text), "say hello")
}

fn rotations(events: &[RelayEvent]) -> Vec<(u32, u32, String)> {
    events
        .iter()
        .filter_map(|event| match event {
            RelayEvent::Rotation {
                attempt,
                max,
                reason,
            } => Some((*attempt, *max, reason.clone())),
            _ => None,
        })
        .collect()
}

fn media_urls(events: &[RelayEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            RelayEvent::Media { url, .. } => Some(url.clone()),
            _ => None,
        })
        .collect()
}

fn assert_single_terminal(events: &[RelayEvent]) {
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "events: {events:?}");
    assert!(events.last().is_some_and(RelayEvent::is_terminal));
}

#[tokio::test]
async fn test_rate_limited_pool_gives_up_after_five_attempts() {
    let server = spawn_upstream().await;
    let sessions = ["busy-1", "busy-2", "busy-3", "busy-4", "busy-5", "busy-6", "busy-7"];
    let (ctx, usage) = relay_context(&server, &sessions);

    let events = run(ctx, image_request(1)).await;

    assert_single_terminal(&events);
    assert_eq!(server.upstream.conversation_sessions().len(), 5);
    let rotations = rotations(&events);
    assert_eq!(
        rotations.iter().map(|r| r.0).collect::<Vec<_>>(),
        [1, 2, 3, 4]
    );
    assert!(rotations.iter().all(|r| r.1 == 5));
    match events.last() {
        Some(RelayEvent::Failed(RelayError::PoolExhausted(message))) => {
            assert!(message.starts_with("gave up after 5 attempts"), "{message}");
        }
        other => panic!("expected pool exhaustion, got {other:?}"),
    }
    assert_eq!(usage.usage(CLIENT_KEY_ID), 0);

    // No credential is tried twice within one call.
    let mut tried = server.upstream.conversation_sessions();
    tried.sort();
    tried.dedup();
    assert_eq!(tried.len(), 5);
}

#[tokio::test]
async fn test_empty_pool_fails_without_upstream_call() {
    let server = spawn_upstream().await;
    let (ctx, _) = relay_context(&server, &[]);

    let events = run(ctx, image_request(1)).await;

    assert_eq!(
        events,
        [RelayEvent::Failed(RelayError::PoolExhausted(
            "no upstream credential available".to_string()
        ))]
    );
    assert!(server.upstream.calls().is_empty());
}

#[tokio::test]
async fn test_shortfall_rotates_and_requests_only_remaining_items() {
    let server = spawn_upstream().await;
    let (ctx, usage) = relay_context(&server, &["pair-a", "pair-b"]);

    let events = run(ctx, image_request(4)).await;

    assert_single_terminal(&events);
    assert_eq!(events.last(), Some(&RelayEvent::Done { delivered: 4 }));
    let counts: Vec<u64> = server
        .upstream
        .calls()
        .iter()
        .map(|c| c.body["imageGenerationCount"].as_u64().unwrap())
        .collect();
    assert_eq!(counts, [4, 2]);

    let rotations = rotations(&events);
    assert_eq!(rotations.len(), 1);
    assert_eq!(rotations[0].2, "received 2 of 4 items");

    let indices: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            RelayEvent::Media { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(indices, [0, 1, 2, 3]);
    let progress: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            RelayEvent::Progress { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(progress, [0, 1, 2, 3]);

    let mut urls = media_urls(&events);
    urls.sort();
    urls.dedup();
    assert_eq!(urls.len(), 4);
    assert_eq!(usage.usage(CLIENT_KEY_ID), 1);
}

#[tokio::test]
async fn test_duplicate_media_is_suppressed_and_partial_success_ends_done() {
    let server = spawn_upstream().await;
    let (ctx, usage) = relay_context(&server, &["dup-a", "dup-b"]);

    let events = run(ctx, image_request(4)).await;

    assert_single_terminal(&events);
    assert_eq!(
        media_urls(&events),
        [
            "https://cdn.test/shared/0.png",
            "https://cdn.test/shared/1.png"
        ]
    );
    assert_eq!(rotations(&events).len(), 2);
    assert_eq!(events.last(), Some(&RelayEvent::Done { delivered: 2 }));
    assert_eq!(server.upstream.conversation_sessions().len(), 2);
    assert_eq!(usage.usage(CLIENT_KEY_ID), 1);
}

#[tokio::test]
async fn test_pinned_rate_limited_credential_rotates_once() {
    let server = spawn_upstream().await;
    let (ctx, _) = relay_context(&server, &["busy-1", "img-1"]);
    let mut request = image_request(2);
    request.pinned_credential = Some("busy-1".to_string());

    let events = run(ctx, request).await;

    assert_single_terminal(&events);
    assert_eq!(server.upstream.conversation_sessions(), ["busy-1", "img-1"]);
    let rotations = rotations(&events);
    assert_eq!(rotations.len(), 1);
    assert_eq!((rotations[0].0, rotations[0].1), (1, 5));
    assert!(rotations[0].2.contains("429"), "{}", rotations[0].2);
    assert!(matches!(events[0], RelayEvent::Rotation { .. }));
    assert_eq!(
        media_urls(&events),
        [
            "https://cdn.test/img-1/0.png",
            "https://cdn.test/img-1/1.png"
        ]
    );
    assert_eq!(events.last(), Some(&RelayEvent::Done { delivered: 2 }));
}

#[tokio::test]
async fn test_unknown_pinned_credential_falls_back_to_pool() {
    let server = spawn_upstream().await;
    let (ctx, _) = relay_context(&server, &["img-1"]);
    let mut request = image_request(1);
    request.pinned_credential = Some("ghost".to_string());

    let events = run(ctx, request).await;

    assert_eq!(events.last(), Some(&RelayEvent::Done { delivered: 1 }));
    assert!(rotations(&events).is_empty());
}

#[tokio::test]
async fn test_image_request_carries_aspect_ratio_and_count() {
    let server = spawn_upstream().await;
    let (ctx, _) = relay_context(&server, &["img-1"]);
    let mut request = image_request(3);
    request.aspect_ratio = "9:16".to_string();

    let outcome = collect(relay(ctx, request)).await.expect("relay outcome");

    assert_eq!(outcome.delivered, 3);
    let calls = server.upstream.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].body["modelName"], "imagine-upstream");
    assert_eq!(calls[0].body["imageGenerationCount"], 3);
    assert_eq!(calls[0].body["imageGenerationConfig"]["aspectRatio"], "9:16");
}

#[tokio::test]
async fn test_text_rate_limit_after_output_is_not_retried() {
    let server = spawn_upstream().await;
    let (ctx, usage) = relay_context(&server, &["textbusy-1", "text-1"]);
    let mut request = text_request();
    request.pinned_credential = Some("textbusy-1".to_string());

    let events = run(ctx, request).await;

    assert_eq!(
        events,
        [
            RelayEvent::Text("partial".to_string()),
            RelayEvent::Failed(RelayError::RateLimited("slow down".to_string())),
        ]
    );
    assert_eq!(server.upstream.conversation_sessions(), ["textbusy-1"]);
    assert_eq!(usage.usage(CLIENT_KEY_ID), 0);
}

#[tokio::test]
async fn test_text_success_counts_usage_once() {
    let server = spawn_upstream().await;
    let (ctx, usage) = relay_context(&server, &["text-1"]);

    let outcome = collect(relay(ctx, text_request())).await.expect("relay outcome");

    assert_eq!(outcome.text, "Hello");
    assert_eq!(outcome.rotations, 0);
    assert_eq!(usage.usage(CLIENT_KEY_ID), 1);
    let calls = server.upstream.calls();
    assert_eq!(calls[0].body["message"], "say hello");
}

#[tokio::test]
async fn test_fatal_upstream_error_is_verbatim_and_not_retried() {
    let server = spawn_upstream().await;
    let (ctx, _) = relay_context(&server, &["blocked-1", "img-1"]);
    let mut request = image_request(1);
    request.pinned_credential = Some("blocked-1".to_string());

    let events = run(ctx, request).await;

    assert_eq!(
        events,
        [RelayEvent::Failed(RelayError::Upstream(
            "content policy violation".to_string()
        ))]
    );
    assert_eq!(server.upstream.conversation_sessions(), ["blocked-1"]);
}

#[tokio::test]
async fn test_completion_without_media_is_no_media() {
    let server = spawn_upstream().await;
    let (ctx, _) = relay_context(&server, &["empty-1"]);

    let events = run(ctx, image_request(1)).await;

    assert_eq!(
        events,
        [
            RelayEvent::Progress {
                index: 0,
                percent: 40
            },
            RelayEvent::Failed(RelayError::NoMedia),
        ]
    );
}

#[tokio::test]
async fn test_mid_stream_rate_limit_keeps_delivered_media() {
    let server = spawn_upstream().await;
    let (ctx, usage) = relay_context(&server, &["flaky-1", "img-2"]);
    let mut request = image_request(4);
    request.pinned_credential = Some("flaky-1".to_string());

    let events = run(ctx, request).await;

    assert_single_terminal(&events);
    assert_eq!(
        media_urls(&events),
        [
            "https://cdn.test/flaky-1/0.png",
            "https://cdn.test/flaky-1/1.png",
            "https://cdn.test/img-2/0.png",
            "https://cdn.test/img-2/1.png"
        ]
    );
    assert_eq!(
        rotations(&events),
        [(1, 5, "capacity reached".to_string())]
    );
    let counts: Vec<u64> = server
        .upstream
        .calls()
        .iter()
        .map(|c| c.body["imageGenerationCount"].as_u64().unwrap())
        .collect();
    assert_eq!(counts, [4, 2]);
    assert_eq!(events.last(), Some(&RelayEvent::Done { delivered: 4 }));
    assert_eq!(usage.usage(CLIENT_KEY_ID), 1);
}
