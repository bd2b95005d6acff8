//! Stream entry and subscriber set types
//!
//! This module defines the per-stream state stored in the registry.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::record::{RecordMessage, StreamKey};
use super::subscriber::{Delivery, Subscriber, SubscriberId};

/// Lifecycle of a stream's readers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Waiting for the upstream stream to become active
    Starting,
    /// One reader per shard is running
    Active,
}

/// Subscribers of one stream, keyed by identity
///
/// Array-backed with linear lookup; subscriber counts per stream are small.
pub struct SubscriberSet<S> {
    subs: Vec<S>,
}

impl<S: Subscriber> SubscriberSet<S> {
    /// Create an empty set
    pub fn new() -> Self {
        Self { subs: Vec::new() }
    }

    /// Add a subscriber
    ///
    /// Returns `false` without modifying the set if a subscriber that is
    /// [`same_as`](Subscriber::same_as) `sub` is already present.
    pub fn add(&mut self, sub: S) -> bool {
        if self.subs.iter().any(|s| s.same_as(&sub)) {
            return false;
        }
        self.subs.push(sub);
        true
    }

    /// Remove a subscriber, returning whether it was present
    pub fn remove(&mut self, id: SubscriberId) -> bool {
        match self.index(id) {
            Some(index) => {
                self.subs.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Check membership by identity
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.index(id).is_some()
    }

    fn index(&self, id: SubscriberId) -> Option<usize> {
        self.subs.iter().position(|s| s.id() == id)
    }

    /// Number of subscribers
    pub fn len(&self) -> usize {
        self.subs.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// Hand a record to every subscriber, returning (accepted, dropped)
    ///
    /// Subscribers that report [`Delivery::Closed`] are counted as dropped
    /// and removed from the set.
    pub fn deliver(&mut self, record: &RecordMessage) -> (u64, u64) {
        let mut accepted = 0;
        let mut dropped = 0;

        self.subs.retain(|sub| match sub.accept(record) {
            Delivery::Accepted => {
                accepted += 1;
                true
            }
            Delivery::Dropped => {
                dropped += 1;
                true
            }
            Delivery::Closed => {
                dropped += 1;
                false
            }
        });

        (accepted, dropped)
    }
}

impl<S: Subscriber> Default for SubscriberSet<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry for a single stream in the registry
pub struct StreamEntry<S> {
    /// Current subscribers (never empty while the entry exists)
    pub subscribers: SubscriberSet<S>,

    /// Shared by the launcher and every reader of this stream
    pub(super) cancel: CancellationToken,

    /// Distinguishes this incarnation from earlier entries for the same key
    pub generation: u64,

    /// Current reader state
    pub state: StreamState,

    /// Number of shards being read (0 until active)
    pub shard_count: usize,

    /// When the stream was created
    pub created_at: Instant,
}

impl<S: Subscriber> StreamEntry<S> {
    /// Create a new entry in the starting state
    pub(super) fn new(cancel: CancellationToken, generation: u64) -> Self {
        Self {
            subscribers: SubscriberSet::new(),
            cancel,
            generation,
            state: StreamState::Starting,
            shard_count: 0,
            created_at: Instant::now(),
        }
    }

    /// Get the number of subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Snapshot this entry
    pub fn stats(&self, key: &StreamKey) -> StreamStats {
        StreamStats {
            stream: key.clone(),
            subscriber_count: self.subscriber_count(),
            state: self.state,
            shard_count: self.shard_count,
        }
    }
}

/// Statistics for a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStats {
    /// Stream these stats describe
    pub stream: StreamKey,
    /// Number of active subscribers
    pub subscriber_count: usize,
    /// Current reader state
    pub state: StreamState,
    /// Number of shards being read
    pub shard_count: usize,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;

    struct Counting {
        id: SubscriberId,
        seen: Arc<AtomicUsize>,
        outcome: Delivery,
    }

    impl Counting {
        fn new(outcome: Delivery) -> Self {
            Self {
                id: Uuid::new_v4(),
                seen: Arc::new(AtomicUsize::new(0)),
                outcome,
            }
        }
    }

    impl Subscriber for Counting {
        fn id(&self) -> SubscriberId {
            self.id
        }

        fn accept(&self, _record: &RecordMessage) -> Delivery {
            self.seen.fetch_add(1, Ordering::Relaxed);
            self.outcome
        }
    }

    #[test]
    fn test_empty_set_contains_nothing() {
        let set: SubscriberSet<Counting> = SubscriberSet::new();
        assert!(!set.contains(Uuid::new_v4()));
        assert!(set.is_empty());
    }

    #[test]
    fn test_add_and_lookup() {
        let mut set = SubscriberSet::new();
        let sub = Counting::new(Delivery::Accepted);
        let id = sub.id;

        assert!(set.add(sub));
        assert!(set.contains(id));
        assert!(!set.contains(Uuid::new_v4()));
    }

    #[test]
    fn test_duplicate_add_is_rejected() {
        let mut set = SubscriberSet::new();
        let sub = Counting::new(Delivery::Accepted);
        let twin = Counting {
            id: sub.id,
            seen: Arc::clone(&sub.seen),
            outcome: Delivery::Accepted,
        };

        assert!(set.add(sub));
        assert!(!set.add(twin));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut set = SubscriberSet::new();
        let a = Counting::new(Delivery::Accepted);
        let b = Counting::new(Delivery::Accepted);
        let (a_id, b_id) = (a.id, b.id);
        set.add(a);
        set.add(b);

        assert!(!set.remove(Uuid::new_v4()));
        assert!(set.remove(a_id));
        assert!(!set.remove(a_id));
        assert_eq!(set.len(), 1);
        assert!(set.contains(b_id));

        assert!(set.remove(b_id));
        assert!(set.is_empty());
    }

    /// Identity by name rather than by id
    struct Named {
        id: SubscriberId,
        name: &'static str,
    }

    impl Subscriber for Named {
        fn id(&self) -> SubscriberId {
            self.id
        }

        fn accept(&self, _record: &RecordMessage) -> Delivery {
            Delivery::Accepted
        }

        fn same_as(&self, other: &Self) -> bool {
            self.name == other.name
        }
    }

    #[test]
    fn test_add_uses_subscriber_identity() {
        let mut set = SubscriberSet::new();

        assert!(set.add(Named { id: Uuid::new_v4(), name: "a" }));
        assert!(!set.add(Named { id: Uuid::new_v4(), name: "a" }));
        assert!(set.add(Named { id: Uuid::new_v4(), name: "b" }));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_deliver_prunes_closed_subscribers() {
        let mut set = SubscriberSet::new();
        let live = Counting::new(Delivery::Accepted);
        let gone = Counting::new(Delivery::Closed);
        let (live_id, gone_id) = (live.id, gone.id);
        let gone_seen = Arc::clone(&gone.seen);
        set.add(live);
        set.add(gone);

        let record = RecordMessage::new(StreamKey::new("us-west-2", "s"), "x");
        assert_eq!(set.deliver(&record), (1, 1));
        assert!(set.contains(live_id));
        assert!(!set.contains(gone_id));

        assert_eq!(set.deliver(&record), (1, 0));
        assert_eq!(gone_seen.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_deliver_counts_outcomes() {
        let mut set = SubscriberSet::new();
        let ok = Counting::new(Delivery::Accepted);
        let full = Counting::new(Delivery::Dropped);
        let ok_seen = Arc::clone(&ok.seen);
        let full_seen = Arc::clone(&full.seen);
        set.add(ok);
        set.add(full);

        let record = RecordMessage::new(StreamKey::new("us-west-2", "s"), "x");
        assert_eq!(set.deliver(&record), (1, 1));
        assert_eq!(ok_seen.load(Ordering::Relaxed), 1);
        assert_eq!(full_seen.load(Ordering::Relaxed), 1);
    }
}
