pub mod classify;
mod http_transport;
pub mod upstream;

pub use http_transport::HttpTransport;
pub use upstream::{ByteStream, FileReference, UpstreamClient};

/// How a failed upstream call should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    /// Capacity or quota rejection tied to the credential; another one may work.
    RateLimited,
    /// The request itself was rejected.
    Fatal,
    /// Connection, timeout or body read failure.
    Transport,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl UpstreamError {
    #[must_use]
    pub fn new(kind: UpstreamErrorKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Transport, None, message)
    }

    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Fatal, None, message)
    }

    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        self.kind == UpstreamErrorKind::RateLimited
    }
}
