//! Shard reader configuration

use std::time::Duration;

use super::StartingPosition;

/// Timing and sizing for shard readers
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Maximum records per fetch
    pub batch_limit: usize,

    /// Pause after a failed fetch before retrying the same cursor
    pub retry_backoff: Duration,

    /// Delay between consecutive fetches on one shard
    pub fetch_interval: Duration,

    /// Interval between topology polls while a stream is not yet active
    pub topology_poll_interval: Duration,

    /// Give up waiting for an active stream after this long (None = wait
    /// forever)
    pub topology_timeout: Option<Duration>,

    /// Where new shard iterators start
    pub starting_position: StartingPosition,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            batch_limit: 100,
            retry_backoff: Duration::from_secs(1),
            fetch_interval: Duration::from_millis(200),
            topology_poll_interval: Duration::from_secs(4),
            topology_timeout: None,
            starting_position: StartingPosition::Latest,
        }
    }
}

impl ReaderConfig {
    /// Set the fetch batch limit
    pub fn batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    /// Set the retry backoff
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the delay between fetches
    pub fn fetch_interval(mut self, interval: Duration) -> Self {
        self.fetch_interval = interval;
        self
    }

    /// Set the topology poll interval
    pub fn topology_poll_interval(mut self, interval: Duration) -> Self {
        self.topology_poll_interval = interval;
        self
    }

    /// Bound the wait for a stream to become active
    pub fn topology_timeout(mut self, timeout: Duration) -> Self {
        self.topology_timeout = Some(timeout);
        self
    }

    /// Set where new shard iterators start
    pub fn starting_position(mut self, position: StartingPosition) -> Self {
        self.starting_position = position;
        self
    }
}
