//! Error types for the Chorus domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum. Runtime callers see them
//! through the orchestrator's error type.

use thiserror::Error;

// --- Bounded context errors ---

/// Failures raised by the generative backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// 4xx: the request itself was rejected.
    #[error("Backend rejected the request: {message} (status: {status_code})")]
    Client { status_code: u16, message: String },

    /// 5xx: the backend is unavailable or failing.
    #[error("Backend unavailable: {message} (status: {status_code})")]
    Server { status_code: u16, message: String },

    /// The backend answered but withheld content (policy filter).
    #[error("Response blocked by content filter: {0}")]
    Blocked(String),

    /// The backend answered with no usable text.
    #[error("Backend returned an empty response")]
    Empty,

    #[error("Backend not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Network error: {0}")]
    Network(String),
}

impl BackendError {
    /// Classify a non-success HTTP status into a client or server failure.
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if (400..500).contains(&status_code) {
            Self::Client {
                status_code,
                message,
            }
        } else {
            Self::Server {
                status_code,
                message,
            }
        }
    }

    /// Blocked and empty results are content-policy outcomes, not transport failures.
    pub fn is_content_filtered(&self) -> bool {
        matches!(self, Self::Blocked(_) | Self::Empty)
    }
}

/// Failures raised by a messaging platform adapter.
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    /// The handle no longer exists upstream.
    #[error("Delivery handle not found: {0}")]
    HandleNotFound(String),

    #[error("Destination not found: {0}")]
    DestinationNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Missing permission: {0}")]
    Forbidden(String),

    #[error("Platform request failed: {0}")]
    Request(String),
}

/// Failures of persona delivery. Callers fall back to a direct reply.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("Handle quota exhausted at {destination} (ceiling {ceiling})")]
    QuotaExhausted { destination: String, ceiling: usize },

    #[error(transparent)]
    Platform(#[from] PlatformError),
}
