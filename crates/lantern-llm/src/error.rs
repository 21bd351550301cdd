//! Provider error types.
//!
//! All port operations return [`Result<T>`] with [`ProviderError`] as the
//! error type. The retry module classifies these into transient and
//! permanent; the tool loop maps permanent errors into user-facing text.

use thiserror::Error;

/// Errors that can occur when interacting with an LLM provider.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProviderError {
    /// The request to the provider failed (network, 5xx).
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// Authentication with the provider was rejected.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The provider returned a rate-limit response (HTTP 429).
    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested wait time before retrying, in milliseconds.
        retry_after_ms: u64,
    },

    /// The requested model does not exist on the provider.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The provider has not been configured (e.g. missing API key).
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// The provider returned a response that could not be parsed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The request timed out.
    #[error("timeout")]
    Timeout,

    /// The call was cancelled cooperatively.
    #[error("cancelled")]
    Cancelled,

    /// An HTTP-level error from the client.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A convenience type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;
