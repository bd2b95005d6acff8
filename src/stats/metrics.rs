//! Statistics for the dispatcher and client sessions

use std::time::{Duration, Instant};

use crate::registry::StreamStats;

/// Counters maintained by the dispatcher task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Records received from readers (or injected via publish)
    pub records_received: u64,
    /// Records that arrived after their stream was torn down
    pub records_without_subscribers: u64,
    /// Successful hand-offs to subscribers
    pub deliveries: u64,
    /// Hand-offs refused by a full or closed subscriber
    pub deliveries_dropped: u64,
    /// Streams whose readers were launched
    pub streams_started: u64,
    /// Streams torn down (last unsubscribe or failed start-up)
    pub streams_stopped: u64,
}

impl DispatchStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one fan-out
    pub fn on_publish(&mut self, outcome: Option<(u64, u64)>) {
        self.records_received += 1;
        match outcome {
            Some((accepted, dropped)) => {
                self.deliveries += accepted;
                self.deliveries_dropped += dropped;
            }
            None => self.records_without_subscribers += 1,
        }
    }
}

/// Point-in-time view of the dispatcher
#[derive(Debug, Clone)]
pub struct DispatchSnapshot {
    /// Every stream with at least one subscriber, ordered by key
    pub streams: Vec<StreamStats>,
    /// Counters since start-up
    pub stats: DispatchStats,
}

impl DispatchSnapshot {
    /// Stats for one stream, if it is registered
    pub fn stream(&self, key: &crate::registry::StreamKey) -> Option<&StreamStats> {
        self.streams.iter().find(|s| &s.stream == key)
    }
}

/// Session-level statistics
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// When the session was opened
    pub connected_at: Instant,
    /// Messages queued for the client
    pub messages_sent: u64,
    /// Messages received from the client
    pub messages_received: u64,
    /// Record payloads that could not be decoded
    pub decode_errors: u64,
}

impl SessionStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self {
            connected_at: Instant::now(),
            messages_sent: 0,
            messages_received: 0,
            decode_errors: 0,
        }
    }

    /// Get session duration
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}
