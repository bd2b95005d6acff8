//! Subscriber capability
//!
//! The dispatcher only ever talks to recipients through this trait, so it can
//! be driven by live client sessions or by in-memory test doubles alike.

use uuid::Uuid;

use super::record::RecordMessage;

/// Stable identity of a subscriber
pub type SubscriberId = Uuid;

/// Outcome of handing a record to a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Record was queued for the subscriber
    Accepted,
    /// Subscriber's buffer was full; the record was discarded
    Dropped,
    /// Subscriber is no longer reading
    Closed,
}

/// A recipient of published records
pub trait Subscriber: Send + 'static {
    /// Identity used for set membership; must not change over the
    /// subscriber's lifetime
    fn id(&self) -> SubscriberId;

    /// Hand a record to the subscriber
    ///
    /// Must not block: a slow subscriber cannot be allowed to stall fan-out
    /// to the other subscribers of the stream.
    fn accept(&self, record: &RecordMessage) -> Delivery;

    /// Whether `other` is the same subscriber
    fn same_as(&self, other: &Self) -> bool
    where
        Self: Sized,
    {
        self.id() == other.id()
    }
}
