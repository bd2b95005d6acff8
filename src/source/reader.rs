//! Per-shard reader task
//!
//! Each shard of an active stream gets one reader. It pulls batches from its
//! cursor, forwards every record to the dispatcher and stops when the
//! stream's cancellation token fires.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{LogSource, ReaderConfig, SourceError};
use crate::registry::{RecordMessage, StreamKey};

/// Why a reader stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    /// The stream's token fired
    Cancelled,
    /// The dispatcher dropped its record receiver
    DispatcherGone,
    /// No records and no cursor progress, or the cursor expired
    Stuck,
    /// The shard was closed upstream and fully read
    ShardClosed,
    /// The shard no longer exists upstream
    ShardMissing,
}

/// Reader for one shard of one stream
pub struct ShardReader<L: ?Sized> {
    source: Arc<L>,
    stream: StreamKey,
    shard_id: String,
    config: Arc<ReaderConfig>,
    records: mpsc::Sender<RecordMessage>,
    cancel: CancellationToken,
}

impl<L: LogSource + ?Sized> ShardReader<L> {
    /// Create a reader; `cancel` is shared by every reader of the stream
    pub fn new(
        source: Arc<L>,
        stream: StreamKey,
        shard_id: String,
        config: Arc<ReaderConfig>,
        records: mpsc::Sender<RecordMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            stream,
            shard_id,
            config,
            records,
            cancel,
        }
    }

    /// Read until cancelled or the shard can make no more progress
    pub async fn run(self) -> ReaderExit {
        let exit = self.read_loop().await;

        tracing::debug!(
            stream = %self.stream,
            shard = %self.shard_id,
            exit = ?exit,
            "Shard reader stopped"
        );
        exit
    }

    async fn read_loop(&self) -> ReaderExit {
        let mut cursor = match self.initial_cursor().await {
            Ok(cursor) => cursor,
            Err(exit) => return exit,
        };

        tracing::info!(stream = %self.stream, shard = %self.shard_id, "Shard reader started");

        loop {
            if self.cancel.is_cancelled() {
                return ReaderExit::Cancelled;
            }

            let batch = match self
                .source
                .get_records(&self.stream, &cursor, self.config.batch_limit)
                .await
            {
                Ok(batch) => batch,
                Err(SourceError::ExpiredIterator) => {
                    tracing::error!(
                        stream = %self.stream,
                        shard = %self.shard_id,
                        "Shard iterator expired, reader exiting"
                    );
                    return ReaderExit::Stuck;
                }
                Err(e) => {
                    tracing::error!(
                        stream = %self.stream,
                        shard = %self.shard_id,
                        error = %e,
                        "Failed to fetch records"
                    );
                    if !self.pause(self.config.retry_backoff + self.config.fetch_interval).await {
                        return ReaderExit::Cancelled;
                    }
                    continue;
                }
            };

            let count = batch.records.len();
            for payload in batch.records {
                let record = RecordMessage::new(self.stream.clone(), payload);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return ReaderExit::Cancelled,
                    sent = self.records.send(record) => {
                        if sent.is_err() {
                            return ReaderExit::DispatcherGone;
                        }
                    }
                }
            }

            match batch.next_cursor {
                Some(next) if count > 0 || next != cursor => cursor = next,
                Some(_) => {
                    tracing::error!(
                        stream = %self.stream,
                        shard = %self.shard_id,
                        "Unable to iterate over records, reader exiting"
                    );
                    return ReaderExit::Stuck;
                }
                None if count == 0 => {
                    tracing::error!(
                        stream = %self.stream,
                        shard = %self.shard_id,
                        "Shard has no next iterator, reader exiting"
                    );
                    return ReaderExit::Stuck;
                }
                None => {
                    tracing::info!(stream = %self.stream, shard = %self.shard_id, "Shard closed");
                    return ReaderExit::ShardClosed;
                }
            }

            if !self.pause(self.config.fetch_interval).await {
                return ReaderExit::Cancelled;
            }
        }
    }

    async fn initial_cursor(&self) -> Result<String, ReaderExit> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(ReaderExit::Cancelled);
            }

            match self
                .source
                .shard_iterator(&self.stream, &self.shard_id, self.config.starting_position)
                .await
            {
                Ok(cursor) => return Ok(cursor),
                Err(e @ (SourceError::StreamNotFound(_) | SourceError::ShardNotFound { .. })) => {
                    tracing::error!(
                        stream = %self.stream,
                        shard = %self.shard_id,
                        error = %e,
                        "Shard is gone, reader exiting"
                    );
                    return Err(ReaderExit::ShardMissing);
                }
                Err(e) => {
                    tracing::error!(
                        stream = %self.stream,
                        shard = %self.shard_id,
                        error = %e,
                        "Failed to get shard iterator"
                    );
                    if !self.pause(self.config.retry_backoff).await {
                        return Err(ReaderExit::Cancelled);
                    }
                }
            }
        }
    }

    /// Sleep unless cancelled first; returns false on cancellation
    async fn pause(&self, duration: std::time::Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
