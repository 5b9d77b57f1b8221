//! Credential failover around one logical generation call.
//!
//! A call moves through credential selection, dispatch and consumption of the
//! decoded upstream stream. Output is forwarded as soon as it is decoded and
//! never retracted; capacity rejections move the call to another credential
//! while the rest of the pool and the rotation budget allow it.

mod collect;
mod failover;

use std::sync::Arc;

use bytes::Bytes;
use rustc_hash::FxHashSet;

use crate::config::Modality;
use crate::pool::{CredentialStore, UsageRecorder};
use crate::routing::ResolvedModel;
use crate::stream::MediaExtractor;
use crate::transport::UpstreamClient;

pub use collect::{collect, RelayOutcome};
pub use failover::relay;

/// Upper bound on credential switches for one call.
pub const MAX_RETRIES: u32 = 5;

/// Terminal failure of a relayed call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("Rate limited by upstream: {0}")]
    RateLimited(String),
    #[error("{0}")]
    Upstream(String),
    #[error("No upstream capacity available: {0}")]
    PoolExhausted(String),
    #[error("Upstream finished without producing any media")]
    NoMedia,
    #[error("Upstream transport error: {0}")]
    Transport(String),
}

/// What the orchestrator emits to protocol encoders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Text(String),
    Progress { index: u32, percent: u32 },
    Media { url: String, index: u32 },
    Rotation { attempt: u32, max: u32, reason: String },
    Done { delivered: u32 },
    Failed(RelayError),
}

impl RelayEvent {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayEvent::Done { .. } | RelayEvent::Failed(_))
    }
}

/// Source image for edits and image-to-video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceImage {
    /// Bytes uploaded to the upstream before the generation call.
    Inline {
        bytes: Bytes,
        mime: String,
        file_name: String,
    },
    /// A URL the upstream can fetch itself.
    Remote(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoOptions {
    pub length_secs: u32,
    pub resolution: String,
}

/// One logical generation call, independent of the client protocol.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: ResolvedModel,
    pub modality: Modality,
    pub prompt: String,
    /// Number of media items wanted. Ignored for text.
    pub target: u32,
    pub aspect_ratio: String,
    /// Credential to use on the first attempt only.
    pub pinned_credential: Option<String>,
    pub nsfw: bool,
    pub source_image: Option<SourceImage>,
    pub video: VideoOptions,
}

impl GenerationRequest {
    #[must_use]
    pub fn new(model: ResolvedModel, prompt: impl Into<String>) -> Self {
        let modality = model.modality;
        let aspect_ratio = model
            .aspect_ratio
            .as_deref()
            .unwrap_or(default_aspect_ratio(modality))
            .to_string();
        Self {
            model,
            modality,
            prompt: prompt.into(),
            target: 1,
            aspect_ratio,
            pinned_credential: None,
            nsfw: false,
            source_image: None,
            video: VideoOptions {
                length_secs: 6,
                resolution: "480p".to_string(),
            },
        }
    }
}

#[must_use]
pub fn default_aspect_ratio(modality: Modality) -> &'static str {
    match modality {
        Modality::Video => "16:9",
        _ => "1:1",
    }
}

/// Per-call failover bookkeeping.
#[derive(Debug, Default)]
pub struct RetryState {
    pub excluded_credential_ids: FxHashSet<String>,
    pub attempts_used: u32,
    pub delivered_count: u32,
    pub seen_urls: FxHashSet<String>,
    pub text_started: bool,
    pub text_chars: u64,
}

impl RetryState {
    #[must_use]
    pub fn budget_left(&self) -> bool {
        self.attempts_used < MAX_RETRIES
    }

    /// A retry loses nothing only while no text has reached the client.
    #[must_use]
    pub fn is_loss_free(&self) -> bool {
        !self.text_started
    }
}

/// Shared collaborators for relayed calls.
#[derive(Clone)]
pub struct RelayContext {
    pub credentials: Arc<dyn CredentialStore>,
    pub upstream: Arc<UpstreamClient>,
    pub media: Arc<MediaExtractor>,
    pub usage: Arc<dyn UsageRecorder>,
    /// Client key id charged on success.
    pub key_id: Arc<str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_state_budget() {
        let mut state = RetryState::default();
        assert!(state.budget_left());
        state.attempts_used = MAX_RETRIES;
        assert!(!state.budget_left());
        assert!(state.is_loss_free());
        state.text_started = true;
        assert!(!state.is_loss_free());
    }

    #[test]
    fn test_terminal_events() {
        assert!(RelayEvent::Done { delivered: 0 }.is_terminal());
        assert!(RelayEvent::Failed(RelayError::NoMedia).is_terminal());
        assert!(!RelayEvent::Text("x".into()).is_terminal());
    }
}
