//! In-process log source
//!
//! Holds streams and shards in memory with the same iterator semantics as
//! the real service: every fetch hands out a fresh cursor, a closed shard
//! stops handing them out, and cursors are single use. A stalled shard
//! answers every fetch with no records and the cursor it was given.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use super::{LogSource, RecordBatch, SourceError, StartingPosition, StreamDescription, StreamStatus};
use crate::registry::StreamKey;

#[derive(Debug, Default)]
struct MemoryShard {
    records: Vec<Bytes>,
    closed: bool,
    stalled: bool,
}

#[derive(Debug)]
struct MemoryStream {
    status: StreamStatus,
    shards: BTreeMap<String, MemoryShard>,
}

#[derive(Debug)]
struct Cursor {
    stream: StreamKey,
    shard: String,
    position: usize,
}

#[derive(Debug, Default)]
struct Inner {
    streams: HashMap<StreamKey, MemoryStream>,
    cursors: HashMap<String, Cursor>,
    next_cursor: u64,
    pending_failures: usize,
    fetches: u64,
    describes: u64,
}

impl Inner {
    fn issue_cursor(&mut self, stream: &StreamKey, shard: &str, position: usize) -> String {
        self.next_cursor += 1;
        let token = format!("{}:{}:{}", stream, shard, self.next_cursor);
        self.cursors.insert(
            token.clone(),
            Cursor {
                stream: stream.clone(),
                shard: shard.to_string(),
                position,
            },
        );
        token
    }

    fn shard_mut(&mut self, stream: &StreamKey, shard: &str) -> Result<&mut MemoryShard, SourceError> {
        self.streams
            .get_mut(stream)
            .ok_or_else(|| SourceError::StreamNotFound(stream.clone()))?
            .shards
            .get_mut(shard)
            .ok_or_else(|| SourceError::ShardNotFound {
                stream: stream.clone(),
                shard: shard.to_string(),
            })
    }
}

/// Log source backed by process memory
#[derive(Debug, Default)]
pub struct MemorySource {
    inner: Mutex<Inner>,
}

/// Shard id for the shard at `index`, in the service's naming scheme
pub fn shard_id(index: usize) -> String {
    format!("shardId-{:012}", index)
}

impl MemorySource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an active stream with `shards` empty shards
    pub async fn create_stream(&self, stream: &StreamKey, shards: usize) -> Vec<String> {
        self.create_stream_with_status(stream, shards, StreamStatus::Active)
            .await
    }

    /// Create a stream in the given status
    pub async fn create_stream_with_status(
        &self,
        stream: &StreamKey,
        shards: usize,
        status: StreamStatus,
    ) -> Vec<String> {
        let ids: Vec<String> = (0..shards).map(shard_id).collect();
        let stream_state = MemoryStream {
            status,
            shards: ids
                .iter()
                .map(|id| (id.clone(), MemoryShard::default()))
                .collect(),
        };
        self.inner
            .lock()
            .await
            .streams
            .insert(stream.clone(), stream_state);
        ids
    }

    /// Change the topology status of a stream
    pub async fn set_status(&self, stream: &StreamKey, status: StreamStatus) -> Result<(), SourceError> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .streams
            .get_mut(stream)
            .ok_or_else(|| SourceError::StreamNotFound(stream.clone()))?;
        entry.status = status;
        Ok(())
    }

    /// Append a record to a shard
    pub async fn put_record(
        &self,
        stream: &StreamKey,
        shard: &str,
        payload: impl Into<Bytes>,
    ) -> Result<(), SourceError> {
        let mut inner = self.inner.lock().await;
        inner.shard_mut(stream, shard)?.records.push(payload.into());
        Ok(())
    }

    /// Close a shard; readers see no further cursor once they reach its end
    pub async fn close_shard(&self, stream: &StreamKey, shard: &str) -> Result<(), SourceError> {
        let mut inner = self.inner.lock().await;
        inner.shard_mut(stream, shard)?.closed = true;
        Ok(())
    }

    /// Stop a shard's cursors from advancing
    pub async fn stall_shard(&self, stream: &StreamKey, shard: &str) -> Result<(), SourceError> {
        let mut inner = self.inner.lock().await;
        inner.shard_mut(stream, shard)?.stalled = true;
        Ok(())
    }

    /// Invalidate every outstanding cursor
    pub async fn expire_cursors(&self) {
        self.inner.lock().await.cursors.clear();
    }

    /// Make the next `count` fetches fail with a transient error
    pub async fn fail_next_fetches(&self, count: usize) {
        self.inner.lock().await.pending_failures = count;
    }

    /// Number of `get_records` calls served so far, including failures
    pub async fn fetch_count(&self) -> u64 {
        self.inner.lock().await.fetches
    }

    /// Number of `describe_stream` calls served so far
    pub async fn describe_count(&self) -> u64 {
        self.inner.lock().await.describes
    }
}

#[async_trait]
impl LogSource for MemorySource {
    async fn describe_stream(&self, stream: &StreamKey) -> Result<StreamDescription, SourceError> {
        let mut inner = self.inner.lock().await;
        inner.describes += 1;
        let entry = inner
            .streams
            .get(stream)
            .ok_or_else(|| SourceError::StreamNotFound(stream.clone()))?;

        Ok(StreamDescription {
            status: entry.status.clone(),
            shards: entry.shards.keys().cloned().collect(),
        })
    }

    async fn shard_iterator(
        &self,
        stream: &StreamKey,
        shard_id: &str,
        position: StartingPosition,
    ) -> Result<String, SourceError> {
        let mut inner = self.inner.lock().await;
        let shard = inner.shard_mut(stream, shard_id)?;
        let start = match position {
            StartingPosition::Latest => shard.records.len(),
            StartingPosition::TrimHorizon => 0,
        };
        Ok(inner.issue_cursor(stream, shard_id, start))
    }

    async fn get_records(
        &self,
        stream: &StreamKey,
        cursor: &str,
        limit: usize,
    ) -> Result<RecordBatch, SourceError> {
        let mut inner = self.inner.lock().await;
        inner.fetches += 1;

        if inner.pending_failures > 0 {
            inner.pending_failures -= 1;
            return Err(SourceError::Unavailable("injected fetch failure".into()));
        }

        let Some(Cursor {
            stream: owner,
            shard: shard_name,
            position,
        }) = inner.cursors.remove(cursor)
        else {
            return Err(SourceError::ExpiredIterator);
        };
        if &owner != stream {
            return Err(SourceError::ExpiredIterator);
        }

        let shard = inner.shard_mut(stream, &shard_name)?;
        if shard.stalled {
            inner.cursors.insert(
                cursor.to_string(),
                Cursor {
                    stream: owner,
                    shard: shard_name,
                    position,
                },
            );
            return Ok(RecordBatch {
                records: Vec::new(),
                next_cursor: Some(cursor.to_string()),
            });
        }

        let end = shard.records.len().min(position + limit);
        let records = shard.records[position.min(end)..end].to_vec();
        let exhausted = shard.closed && end == shard.records.len();

        let next_cursor = if exhausted {
            None
        } else {
            Some(inner.issue_cursor(stream, &shard_name, end))
        };

        Ok(RecordBatch {
            records,
            next_cursor,
        })
    }

    async fn list_streams(&self) -> Result<Vec<StreamKey>, SourceError> {
        let inner = self.inner.lock().await;
        let mut keys: Vec<StreamKey> = inner.streams.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
