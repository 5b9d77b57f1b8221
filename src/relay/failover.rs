use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{self, Stream};
use futures_util::StreamExt;

use super::{
    GenerationRequest, RelayContext, RelayError, RelayEvent, RetryState, SourceImage, MAX_RETRIES,
};
use crate::config::Modality;
use crate::observability::log_request_complete;
use crate::observability::token_counter::{estimate_tokens, RelayUsage};
use crate::pool::Credential;
use crate::stream::{NdjsonDecoder, NormalizedEvent, UpstreamFrame};
use crate::transport::upstream::VideoParams;
use crate::transport::{ByteStream, UpstreamError, UpstreamErrorKind};

type Frames = NdjsonDecoder<ByteStream>;

/// Relay one generation call, yielding events until exactly one terminal
/// [`RelayEvent::Done`] or [`RelayEvent::Failed`].
///
/// Dropping the stream drops any open upstream response.
pub fn relay(
    ctx: RelayContext,
    request: GenerationRequest,
) -> impl Stream<Item = RelayEvent> + Send + 'static {
    let failover = Failover::new(ctx, request);
    stream::unfold(failover, |mut failover| async move {
        let event = failover.next_event().await?;
        Some((event, failover))
    })
}

enum Phase {
    Select,
    Consume {
        frames: Box<Frames>,
        credential: Arc<Credential>,
    },
    Finished,
}

enum Step {
    Continue,
    Rotate(String),
    Succeed,
    Fail(RelayError),
}

struct Failover {
    ctx: RelayContext,
    request: GenerationRequest,
    state: RetryState,
    phase: Phase,
    outbox: VecDeque<RelayEvent>,
    pinned: Option<String>,
    progress_offset: u32,
    started: Instant,
}

impl Failover {
    fn new(ctx: RelayContext, request: GenerationRequest) -> Self {
        let mut state = RetryState::default();
        if let Some(SourceImage::Remote(url)) = &request.source_image {
            if let Some(url) = ctx.media.resolve(url) {
                state.seen_urls.insert(url);
            }
        }
        Self {
            pinned: request.pinned_credential.clone(),
            ctx,
            request,
            state,
            phase: Phase::Select,
            outbox: VecDeque::new(),
            progress_offset: 0,
            started: Instant::now(),
        }
    }

    async fn next_event(&mut self) -> Option<RelayEvent> {
        loop {
            if let Some(event) = self.outbox.pop_front() {
                return Some(event);
            }
            match std::mem::replace(&mut self.phase, Phase::Finished) {
                Phase::Finished => return None,
                Phase::Select => self.select_and_dispatch().await,
                Phase::Consume {
                    mut frames,
                    credential,
                } => {
                    // A body that ends without a completion marker counts as complete.
                    let step = match frames.next().await {
                        Some(frame) => self.on_frame(frame),
                        None => self.on_complete(),
                    };
                    if matches!(step, Step::Continue) {
                        self.phase = Phase::Consume { frames, credential };
                    } else {
                        drop(frames);
                        self.apply(step, &credential);
                    }
                }
            }
        }
    }

    fn apply(&mut self, step: Step, credential: &Credential) {
        match step {
            Step::Continue => {}
            Step::Rotate(reason) => self.rotate(credential, reason),
            Step::Succeed => self.succeed(),
            Step::Fail(err) => self.fail(err),
        }
    }

    async fn select_and_dispatch(&mut self) {
        let Some(credential) = self.select() else {
            if self.partial_success_allowed() {
                self.succeed();
            } else {
                self.fail(RelayError::PoolExhausted(
                    "no upstream credential available".to_string(),
                ));
            }
            return;
        };
        self.ctx.credentials.touch(&credential.id);
        tracing::debug!(
            credential_id = %credential.id,
            attempt = self.state.attempts_used + 1,
            model = %self.request.model.public_id,
            modality = %self.request.modality,
            "dispatching upstream call"
        );

        self.progress_offset = self.state.delivered_count;
        match self.dispatch(&credential).await {
            Ok(body) => {
                self.phase = Phase::Consume {
                    frames: Box::new(NdjsonDecoder::new(body)),
                    credential,
                };
            }
            Err(err) => {
                let step = match err.kind {
                    UpstreamErrorKind::RateLimited => self.on_rate_limited(err.message),
                    UpstreamErrorKind::Fatal => Step::Fail(RelayError::Upstream(err.message)),
                    UpstreamErrorKind::Transport => Step::Fail(RelayError::Transport(err.message)),
                };
                self.apply(step, &credential);
            }
        }
    }

    fn select(&mut self) -> Option<Arc<Credential>> {
        let store = &self.ctx.credentials;
        if let Some(pinned) = self.pinned.take() {
            if let Some(credential) = store
                .get(&pinned)
                .filter(|c| !self.state.excluded_credential_ids.contains(&c.id))
            {
                return Some(credential);
            }
            tracing::warn!(credential_id = %pinned, "pinned credential unavailable, selecting from pool");
        }
        store.get_random(&self.state.excluded_credential_ids)
    }

    async fn dispatch(&mut self, credential: &Credential) -> Result<ByteStream, UpstreamError> {
        let upstream = Arc::clone(&self.ctx.upstream);
        let request = &self.request;
        let remaining = request
            .target
            .saturating_sub(self.state.delivered_count)
            .max(1);

        match request.modality {
            Modality::Text => {
                upstream
                    .stream_text(credential, &request.model, &request.prompt)
                    .await
            }
            Modality::Image => {
                upstream
                    .stream_image(
                        credential,
                        &request.model,
                        &request.prompt,
                        remaining,
                        &request.aspect_ratio,
                        request.nsfw,
                    )
                    .await
            }
            Modality::ImageEdit => {
                let Some(SourceImage::Inline {
                    bytes,
                    mime,
                    file_name,
                }) = &request.source_image
                else {
                    return Err(UpstreamError::fatal(
                        "image edit requires an uploaded source image",
                    ));
                };
                let file = upstream
                    .upload_file(credential, bytes, mime, file_name)
                    .await?;
                if let Some(url) = self.ctx.media.resolve(&file.file_uri) {
                    self.state.seen_urls.insert(url);
                }
                upstream
                    .stream_image_edit(credential, &request.model, &request.prompt, &file, remaining)
                    .await
            }
            Modality::Video => {
                let source_url = match &request.source_image {
                    Some(SourceImage::Inline {
                        bytes,
                        mime,
                        file_name,
                    }) => {
                        let file = upstream
                            .upload_file(credential, bytes, mime, file_name)
                            .await?;
                        let resolved = self.ctx.media.resolve(&file.file_uri);
                        if let Some(url) = &resolved {
                            self.state.seen_urls.insert(url.clone());
                        }
                        Some(resolved.unwrap_or(file.file_uri))
                    }
                    Some(SourceImage::Remote(url)) => Some(url.clone()),
                    None => None,
                };
                let params = VideoParams {
                    aspect_ratio: &request.aspect_ratio,
                    length_secs: request.video.length_secs,
                    resolution: &request.video.resolution,
                    nsfw: request.nsfw,
                    source_image_url: source_url.as_deref(),
                };
                upstream
                    .stream_video(credential, &request.model, &request.prompt, params)
                    .await
            }
        }
    }

    fn on_frame(&mut self, frame: UpstreamFrame) -> Step {
        for url in self.ctx.media.extract(&frame.value) {
            self.forward_media(url);
        }
        let Some(event) = frame.event else {
            return Step::Continue;
        };
        match event {
            NormalizedEvent::TextDelta { text } => {
                self.state.text_started = true;
                self.state.text_chars += text.chars().count() as u64;
                self.outbox.push_back(RelayEvent::Text(text));
                Step::Continue
            }
            NormalizedEvent::Progress { index, percent } => {
                self.outbox.push_back(RelayEvent::Progress {
                    index: self.progress_offset.saturating_add(index),
                    percent,
                });
                Step::Continue
            }
            NormalizedEvent::MediaFound { url, .. } => {
                self.forward_media(url);
                Step::Continue
            }
            NormalizedEvent::Complete => self.on_complete(),
            NormalizedEvent::Error {
                message,
                rate_limited: true,
            } => self.on_rate_limited(message),
            NormalizedEvent::Error {
                message,
                rate_limited: false,
            } => Step::Fail(RelayError::Upstream(message)),
        }
    }

    fn forward_media(&mut self, url: String) {
        if self.state.seen_urls.contains(&url) {
            return;
        }
        if self.request.modality.is_media() && self.state.delivered_count >= self.request.target {
            return;
        }
        self.state.seen_urls.insert(url.clone());
        let index = self.state.delivered_count;
        self.state.delivered_count += 1;
        self.outbox.push_back(RelayEvent::Media { url, index });
    }

    fn wants_more(&self) -> bool {
        match self.request.modality {
            Modality::Text => true,
            _ => self.state.delivered_count < self.request.target,
        }
    }

    fn partial_success_allowed(&self) -> bool {
        self.request.modality.is_media() && self.state.delivered_count > 0
    }

    fn on_complete(&mut self) -> Step {
        if self.request.modality == Modality::Text || !self.wants_more() {
            return Step::Succeed;
        }
        let delivered = self.state.delivered_count;
        if delivered == 0 {
            return Step::Fail(RelayError::NoMedia);
        }
        Step::Rotate(format!(
            "received {delivered} of {} items",
            self.request.target
        ))
    }

    fn on_rate_limited(&mut self, message: String) -> Step {
        if !self.state.is_loss_free() {
            return Step::Fail(RelayError::RateLimited(message));
        }
        if !self.wants_more() {
            return Step::Succeed;
        }
        Step::Rotate(message)
    }

    fn rotate(&mut self, credential: &Credential, reason: String) {
        self.state
            .excluded_credential_ids
            .insert(credential.id.clone());
        self.state.attempts_used += 1;

        if !self.state.budget_left() {
            tracing::warn!(
                credential_id = %credential.id,
                attempt = self.state.attempts_used,
                delivered = self.state.delivered_count,
                reason = %reason,
                "rotation budget spent"
            );
            if self.partial_success_allowed() {
                self.succeed();
            } else {
                self.fail(RelayError::PoolExhausted(format!(
                    "gave up after {MAX_RETRIES} attempts: {reason}"
                )));
            }
            return;
        }

        tracing::info!(
            credential_id = %credential.id,
            attempt = self.state.attempts_used,
            delivered = self.state.delivered_count,
            reason = %reason,
            "rotating upstream credential"
        );
        self.outbox.push_back(RelayEvent::Rotation {
            attempt: self.state.attempts_used,
            max: MAX_RETRIES,
            reason,
        });
        self.phase = Phase::Select;
    }

    fn succeed(&mut self) {
        let delivered = self.state.delivered_count;
        self.ctx.usage.increment_usage(&self.ctx.key_id);
        let usage = RelayUsage {
            input_tokens: estimate_tokens(&self.request.prompt),
            output_tokens: self.state.text_chars.div_ceil(4),
            media_items: delivered,
        };
        log_request_complete(&self.request.model.public_id, &usage, self.started);
        self.outbox.push_back(RelayEvent::Done { delivered });
        self.phase = Phase::Finished;
    }

    fn fail(&mut self, err: RelayError) {
        tracing::warn!(
            model = %self.request.model.public_id,
            attempt = self.state.attempts_used,
            delivered = self.state.delivered_count,
            error = %err,
            "relay call failed"
        );
        self.outbox.push_back(RelayEvent::Failed(err));
        self.phase = Phase::Finished;
    }
}
