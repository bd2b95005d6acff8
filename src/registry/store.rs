//! Subscription registry implementation
//!
//! Maps each active stream to its subscribers and to the cancellation token
//! of its readers. Not synchronized: the dispatcher task is the only owner.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use super::entry::{StreamEntry, StreamState, StreamStats};
use super::error::RegistryError;
use super::record::{RecordMessage, StreamKey};
use super::subscriber::{Subscriber, SubscriberId};

/// Result of adding a subscriber
#[derive(Debug)]
pub(super) enum Subscribed {
    /// The stream had no entry; readers must be started under `cancel`
    NewStream {
        cancel: CancellationToken,
        generation: u64,
    },
    /// Joined a stream that was already being read
    Joined { subscribers: usize },
    /// Subscriber was already present; nothing changed
    AlreadySubscribed,
}

/// Result of removing a subscriber
#[derive(Debug, PartialEq, Eq)]
pub(super) enum Unsubscribed {
    /// Other subscribers remain
    Removed { remaining: usize },
    /// That was the last subscriber; the stream's readers were cancelled
    StreamClosed,
}

/// Result of fanning one record out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Published {
    pub accepted: u64,
    pub dropped: u64,
    /// Every subscriber had stopped reading; the stream was torn down
    pub stream_closed: bool,
}

/// Registry of all streams with at least one subscriber
///
/// Invariant: a key is present iff its subscriber set is non-empty iff its
/// cancellation token has not fired.
pub(super) struct Subscriptions<S> {
    streams: HashMap<StreamKey, StreamEntry<S>>,

    /// Parent of every per-stream token
    root: CancellationToken,

    next_generation: u64,
}

impl<S: Subscriber> Subscriptions<S> {
    pub(super) fn new(root: CancellationToken) -> Self {
        Self {
            streams: HashMap::new(),
            root,
            next_generation: 1,
        }
    }

    /// Add `sub` to `stream`, creating the entry if this is the first
    /// subscriber
    pub(super) fn subscribe(&mut self, stream: &StreamKey, sub: S) -> Subscribed {
        let id = sub.id();

        if let Some(entry) = self.streams.get_mut(stream) {
            if !entry.subscribers.add(sub) {
                tracing::warn!(
                    stream = %stream,
                    subscriber = %id,
                    "Subscriber is already subscribed"
                );
                return Subscribed::AlreadySubscribed;
            }

            tracing::info!(
                stream = %stream,
                subscriber = %id,
                subscribers = entry.subscriber_count(),
                "Subscriber added"
            );
            return Subscribed::Joined {
                subscribers: entry.subscriber_count(),
            };
        }

        let cancel = self.root.child_token();
        let generation = self.next_generation;
        self.next_generation += 1;

        let mut entry = StreamEntry::new(cancel.clone(), generation);
        entry.subscribers.add(sub);
        self.streams.insert(stream.clone(), entry);

        tracing::info!(
            stream = %stream,
            subscriber = %id,
            generation = generation,
            "Subscriber added (new stream)"
        );

        Subscribed::NewStream { cancel, generation }
    }

    /// Remove `id` from `stream`, tearing the stream down if it was the last
    /// subscriber
    pub(super) fn unsubscribe(
        &mut self,
        stream: &StreamKey,
        id: SubscriberId,
    ) -> Result<Unsubscribed, RegistryError> {
        let Some(entry) = self.streams.get_mut(stream) else {
            tracing::warn!(
                stream = %stream,
                subscriber = %id,
                "Unsubscribe from stream without subscribers"
            );
            return Err(RegistryError::StreamNotFound(stream.clone()));
        };

        if !entry.subscribers.remove(id) {
            tracing::warn!(
                stream = %stream,
                subscriber = %id,
                "Subscriber is not subscribed"
            );
            return Err(RegistryError::NotSubscribed {
                stream: stream.clone(),
                subscriber: id,
            });
        }

        if entry.subscribers.is_empty() {
            self.close(stream);
            tracing::info!(stream = %stream, subscriber = %id, "Last subscriber removed");
            return Ok(Unsubscribed::StreamClosed);
        }

        tracing::info!(
            stream = %stream,
            subscriber = %id,
            subscribers = entry.subscriber_count(),
            "Subscriber removed"
        );
        Ok(Unsubscribed::Removed {
            remaining: entry.subscriber_count(),
        })
    }

    /// Fan a record out to the stream's subscribers
    ///
    /// Returns `None` when the stream has been torn down; the record is
    /// dropped. Subscribers that stopped reading are removed, and the stream
    /// is torn down if none remain.
    pub(super) fn publish(&mut self, record: &RecordMessage) -> Option<Published> {
        let stream = &record.stream;
        let entry = self.streams.get_mut(stream)?;

        let before = entry.subscriber_count();
        let (accepted, dropped) = entry.subscribers.deliver(record);
        let pruned = before - entry.subscriber_count();
        let stream_closed = entry.subscribers.is_empty();

        if pruned > 0 {
            tracing::info!(
                stream = %stream,
                pruned = pruned,
                subscribers = entry.subscriber_count(),
                "Removed subscribers that stopped reading"
            );
        }
        if stream_closed {
            self.close(stream);
            tracing::info!(stream = %stream, "Last subscriber gone");
        }

        Some(Published {
            accepted,
            dropped,
            stream_closed,
        })
    }

    /// Record that the readers of `generation` are running
    pub(super) fn mark_active(&mut self, stream: &StreamKey, generation: u64, shards: usize) -> bool {
        match self.streams.get_mut(stream) {
            Some(entry) if entry.generation == generation => {
                entry.state = StreamState::Active;
                entry.shard_count = shards;
                true
            }
            _ => false,
        }
    }

    /// Drop a stream whose start-up failed
    ///
    /// Ignored if the entry has since been replaced or removed.
    pub(super) fn fail(&mut self, stream: &StreamKey, generation: u64) -> bool {
        let current = self
            .streams
            .get(stream)
            .is_some_and(|entry| entry.generation == generation);
        if current {
            self.close(stream);
        }
        current
    }

    fn close(&mut self, stream: &StreamKey) {
        if let Some(entry) = self.streams.remove(stream) {
            entry.cancel.cancel();
        }
    }

    /// Whether `stream` has an entry
    #[cfg(test)]
    pub(super) fn contains(&self, stream: &StreamKey) -> bool {
        self.streams.contains_key(stream)
    }

    /// Get total number of streams
    pub(super) fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Per-stream statistics, ordered by key
    pub(super) fn stats(&self) -> Vec<StreamStats> {
        let mut stats: Vec<StreamStats> = self
            .streams
            .iter()
            .map(|(key, entry)| entry.stats(key))
            .collect();
        stats.sort_by(|a, b| a.stream.cmp(&b.stream));
        stats
    }
}
