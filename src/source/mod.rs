//! Upstream log access
//!
//! The dispatcher reads from a shard-partitioned log through the
//! [`LogSource`] trait. [`KinesisSource`] talks to AWS Kinesis;
//! [`MemorySource`] keeps everything in process and backs the tests.
//!
//! ```text
//!   subscribe ──► launcher: wait_until_active() ──► ShardReader × N
//!                                                        │
//!                           get_records() every 200ms ◄──┤
//!                                                        ▼
//!                                        mpsc<RecordMessage> ──► Dispatcher
//! ```

pub mod config;
pub mod kinesis;
pub mod memory;
pub mod reader;
pub mod topology;

pub use config::ReaderConfig;
pub use kinesis::KinesisSource;
pub use memory::MemorySource;
pub use reader::ShardReader;
pub use topology::wait_until_active;

use async_trait::async_trait;
use bytes::Bytes;

use crate::registry::StreamKey;

/// Where a fresh shard iterator starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartingPosition {
    /// Only records written after the iterator is created
    #[default]
    Latest,
    /// Oldest record still retained by the shard
    TrimHorizon,
}

/// Topology status of a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    Creating,
    Updating,
    Active,
    Deleting,
    Other(String),
}

impl std::fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamStatus::Creating => write!(f, "CREATING"),
            StreamStatus::Updating => write!(f, "UPDATING"),
            StreamStatus::Active => write!(f, "ACTIVE"),
            StreamStatus::Deleting => write!(f, "DELETING"),
            StreamStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Stream topology as reported by the log service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescription {
    pub status: StreamStatus,
    pub shards: Vec<String>,
}

/// One page of records from a shard
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    /// Record payloads in shard order
    pub records: Vec<Bytes>,
    /// Cursor for the next fetch; `None` once the shard is closed
    pub next_cursor: Option<String>,
}

/// Error type for upstream log operations
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Error returned by the Kinesis API
    #[error("kinesis error: {0}")]
    Kinesis(#[from] Box<aws_sdk_kinesis::Error>),

    /// No client was configured for the region
    #[error("region not configured: {0}")]
    RegionNotConfigured(String),

    /// The stream does not exist upstream
    #[error("stream not found: {0}")]
    StreamNotFound(StreamKey),

    /// The shard does not exist upstream
    #[error("shard {shard} not found in {stream}")]
    ShardNotFound { stream: StreamKey, shard: String },

    /// Shard iterator is no longer valid
    #[error("shard iterator expired")]
    ExpiredIterator,

    /// Stream never reached the active state
    #[error("stream {0} did not become active in time")]
    TopologyTimeout(StreamKey),

    /// Transient failure (used by in-memory sources)
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Access to a shard-partitioned log
#[async_trait]
pub trait LogSource: Send + Sync + 'static {
    /// Current status and shard list of a stream
    async fn describe_stream(&self, stream: &StreamKey) -> Result<StreamDescription, SourceError>;

    /// Create a cursor for one shard
    async fn shard_iterator(
        &self,
        stream: &StreamKey,
        shard_id: &str,
        position: StartingPosition,
    ) -> Result<String, SourceError>;

    /// Fetch up to `limit` records starting at `cursor`
    async fn get_records(
        &self,
        stream: &StreamKey,
        cursor: &str,
        limit: usize,
    ) -> Result<RecordBatch, SourceError>;

    /// Every stream the source can serve
    async fn list_streams(&self) -> Result<Vec<StreamKey>, SourceError>;
}
