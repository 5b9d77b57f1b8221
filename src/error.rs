use crate::protocol::error_shapes::{anthropic_error_payload, openai_error_payload};
use crate::protocol::IngressApi;
use crate::relay::RelayError;

/// Request-level error type used by the HTTP surface.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Auth error: {0}")]
    Auth(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Model not found: {0}")]
    ModelNotFound(String),
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    NotFound,
    RateLimit,
    Overloaded,
    BadGateway,
    ServerError,
}

/// Status used for pool exhaustion. Not a registered code, so built at runtime.
pub const OVERLOADED_STATUS: u16 = 529;

impl RelayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::RateLimited(_) => ErrorCategory::RateLimit,
            RelayError::PoolExhausted(_) => ErrorCategory::Overloaded,
            RelayError::Upstream(_) | RelayError::NoMedia | RelayError::Transport(_) => {
                ErrorCategory::BadGateway
            }
        }
    }
}

impl GatewayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            GatewayError::Auth(_) => ErrorCategory::Authentication,
            GatewayError::ModelNotFound(_) => ErrorCategory::NotFound,
            GatewayError::Relay(err) => err.category(),
            GatewayError::Config(_) | GatewayError::Internal(_) => ErrorCategory::ServerError,
        }
    }
}

#[must_use]
pub fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::Authentication => http::StatusCode::UNAUTHORIZED,
        ErrorCategory::NotFound => http::StatusCode::NOT_FOUND,
        ErrorCategory::RateLimit => http::StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::Overloaded => http::StatusCode::from_u16(OVERLOADED_STATUS)
            .unwrap_or(http::StatusCode::SERVICE_UNAVAILABLE),
        ErrorCategory::BadGateway => http::StatusCode::BAD_GATEWAY,
        ErrorCategory::ServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ---------------------------------------------------------------------------
// Format an error for a given ingress API
// ---------------------------------------------------------------------------

/// Format an error for a given ingress API, returning (`status_code`, JSON body).
#[must_use]
pub fn format_error(
    err: &GatewayError,
    ingress: IngressApi,
) -> (http::StatusCode, serde_json::Value) {
    let cat = err.category();
    let status = http_status_for_category(cat);
    let message = err.to_string();

    let body = match ingress {
        IngressApi::OpenAiMedia => openai_error_payload(cat, &message),
        IngressApi::Anthropic => anthropic_error_payload(cat, &message),
    };

    (status, body)
}

// ---------------------------------------------------------------------------
// Axum integration
// ---------------------------------------------------------------------------

/// Convert a `GatewayError` into an axum response for a specific ingress.
#[must_use]
pub fn into_axum_response(err: &GatewayError, ingress: IngressApi) -> axum::response::Response {
    use axum::response::IntoResponse;
    let (status, body) = format_error(err, ingress);
    (status, axum::Json(body)).into_response()
}

/// Falls back to the media ingress shape. Handlers call [`into_axum_response`]
/// with their own ingress instead.
impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        into_axum_response(&self, IngressApi::OpenAiMedia)
    }
}
