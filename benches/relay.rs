use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rustc_hash::FxHashSet;

use genrelay::auth::{authenticate, ClientKeys};
use genrelay::config::{ClientKey, Modality};
use genrelay::pool::{Credential, CredentialStore, MemoryCredentialStore};
use genrelay::protocol::anthropic::AnthropicStreamEncoder;
use genrelay::protocol::openai_media::encode_event;
use genrelay::protocol::{IngressApi, RenderContext};
use genrelay::relay::RelayEvent;
use genrelay::stream::{decode_line, MediaExtractor};

fn render_context(modality: Modality) -> RenderContext {
    RenderContext {
        id: "gen-bench".to_string(),
        model: "imagine".to_string(),
        prompt: "a lighthouse at dusk".to_string(),
        target: 4,
        modality,
        aspect_ratio: "16:9".to_string(),
        created: 1_700_000_000,
        input_tokens: 5,
    }
}

fn token_line(token: &str) -> Vec<u8> {
    format!(r#"{{"result":{{"response":{{"token":"{token}","isThinking":false}}}}}}"#).into_bytes()
}

fn media_line(count: usize) -> Vec<u8> {
    let urls: Vec<String> = (0..count)
        .map(|i| format!("\"users/u1/generated/{i}/image.png\""))
        .collect();
    format!(
        r#"{{"result":{{"response":{{"modelResponse":{{"message":"","generatedImageUrls":[{}]}}}}}}}}"#,
        urls.join(",")
    )
    .into_bytes()
}

fn bench_decode_line(c: &mut Criterion) {
    let token = token_line(&"a".repeat(64));
    c.bench_function("ndjson_decode_token_64b", |b| {
        b.iter(|| black_box(decode_line(black_box(&token))));
    });

    let media = media_line(4);
    c.bench_function("ndjson_decode_model_response_4_images", |b| {
        b.iter(|| black_box(decode_line(black_box(&media))));
    });
}

fn bench_media_extract(c: &mut Criterion) {
    let value: serde_json::Value =
        serde_json::from_slice(&media_line(4)).expect("media line is json");

    let direct = MediaExtractor::new("https://assets.example", None);
    c.bench_function("media_extract_4_relative", |b| {
        b.iter(|| black_box(direct.extract(black_box(&value))));
    });

    let proxied = MediaExtractor::new("https://assets.example", Some("https://relay.example"));
    c.bench_function("media_extract_4_republished", |b| {
        b.iter(|| black_box(proxied.extract(black_box(&value))));
    });
}

fn bench_encoders(c: &mut Criterion) {
    let events: Vec<RelayEvent> = (0..4)
        .flat_map(|index| {
            [
                RelayEvent::Progress {
                    index,
                    percent: 100,
                },
                RelayEvent::Media {
                    url: format!("https://assets.example/users/u1/{index}.png"),
                    index,
                },
            ]
        })
        .chain(std::iter::once(RelayEvent::Done { delivered: 4 }))
        .collect();

    let media_ctx = render_context(Modality::Image);
    c.bench_function("openai_media_encode_9_events", |b| {
        b.iter(|| {
            for event in &events {
                black_box(encode_event(&media_ctx, black_box(event)));
            }
        });
    });

    let text_events: Vec<RelayEvent> = (0..32)
        .map(|i| RelayEvent::Text(format!("token-{i} ")))
        .chain(std::iter::once(RelayEvent::Done { delivered: 0 }))
        .collect();
    let text_ctx = render_context(Modality::Text);
    c.bench_function("anthropic_envelope_32_deltas", |b| {
        b.iter(|| {
            let mut encoder = AnthropicStreamEncoder::new(text_ctx.clone());
            for event in &text_events {
                black_box(encoder.encode(black_box(event)));
            }
        });
    });
}

fn bench_pool_and_auth(c: &mut Criterion) {
    let store = MemoryCredentialStore::new(
        (0..64)
            .map(|i| Credential::new(format!("cred-{i}"), format!("session-{i}"), None))
            .collect(),
    );
    let mut excluded = FxHashSet::default();
    for i in 0..4 {
        excluded.insert(format!("cred-{i}"));
    }
    c.bench_function("pool_get_random_64_excluding_4", |b| {
        b.iter(|| black_box(store.get_random(black_box(&excluded))));
    });

    let keys = ClientKeys::new(&[ClientKey {
        id: "team-a".to_string(),
        key: "client-key".to_string(),
    }]);
    let mut headers = http::HeaderMap::new();
    headers.insert("x-api-key", http::HeaderValue::from_static("client-key"));
    c.bench_function("authenticate_x_api_key", |b| {
        b.iter(|| {
            black_box(authenticate(
                black_box(IngressApi::Anthropic),
                black_box(&headers),
                black_box(&keys),
            ))
        });
    });
}

criterion_group!(
    benches,
    bench_decode_line,
    bench_media_extract,
    bench_encoders,
    bench_pool_and_auth
);
criterion_main!(benches);
