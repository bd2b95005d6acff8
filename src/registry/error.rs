//! Registry error types
//!
//! Error types for subscription registry operations.

use super::record::StreamKey;
use super::subscriber::SubscriberId;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Stream has no subscribers at all
    #[error("Stream not found: {0}")]
    StreamNotFound(StreamKey),
    /// Stream exists but the subscriber is not part of it
    #[error("Subscriber {subscriber} is not subscribed to {stream}")]
    NotSubscribed {
        stream: StreamKey,
        subscriber: SubscriberId,
    },
}
