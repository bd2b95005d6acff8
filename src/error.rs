//! Crate-wide error types

use crate::registry::RegistryError;
use crate::source::SourceError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket or listener failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Upstream log failure
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Subscription registry rejected the request
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The dispatcher task has stopped and no longer accepts requests
    #[error("dispatcher is not running")]
    DispatcherClosed,

    /// The client's outbound queue is gone
    #[error("session closed")]
    SessionClosed,

    /// Malformed client message
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Protocol(err.to_string())
    }
}
