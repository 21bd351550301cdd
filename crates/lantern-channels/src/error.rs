//! Channel-specific error type.

use thiserror::Error;

/// Errors reported by channel adapters.
///
/// Response routing converts these into `RoutingOutcome.error_message`;
/// they never propagate out of the routing system.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ChannelError {
    /// Failed to establish a connection to the channel backend.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication / authorization was rejected.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Sending a message failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The requested channel was not registered.
    #[error("channel not found: {0}")]
    NotFound(String),

    /// The channel does not support the requested delivery kind
    /// (voice, attachments).
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Catch-all for errors that do not fit other variants.
    #[error("{0}")]
    Other(String),
}
