//! Waiting for a stream to become readable

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{LogSource, ReaderConfig, SourceError, StreamDescription, StreamStatus};
use crate::registry::StreamKey;

/// Poll the stream's topology until it reports ACTIVE
///
/// Returns `Ok(None)` if `cancel` fires first. Transient describe failures
/// are logged and polled through; a stream that does not exist fails
/// immediately. Without a configured timeout the wait is unbounded.
pub async fn wait_until_active<L: LogSource + ?Sized>(
    source: &L,
    stream: &StreamKey,
    config: &ReaderConfig,
    cancel: &CancellationToken,
) -> Result<Option<StreamDescription>, SourceError> {
    let deadline = config.topology_timeout.map(|t| Instant::now() + t);

    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }

        match source.describe_stream(stream).await {
            Ok(description) if description.status == StreamStatus::Active => {
                return Ok(Some(description));
            }
            Ok(description) => {
                tracing::info!(
                    stream = %stream,
                    status = %description.status,
                    "Waiting for stream to become active"
                );
            }
            Err(SourceError::StreamNotFound(key)) => {
                return Err(SourceError::StreamNotFound(key));
            }
            Err(e) => {
                tracing::warn!(stream = %stream, error = %e, "Failed to describe stream");
            }
        }

        if deadline.is_some_and(|d| Instant::now() + config.topology_poll_interval > d) {
            return Err(SourceError::TopologyTimeout(stream.clone()));
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            _ = tokio::time::sleep(config.topology_poll_interval) => {}
        }
    }
}
