//! Live fan-out of Kinesis shard records to WebSocket clients
//!
//! Clients subscribe to streams by name and region. The first subscriber of
//! a stream starts one reader per shard; the last one to leave stops them.
//! Every record read is handed to each current subscriber of its stream
//! without blocking, so a slow client loses records instead of stalling the
//! others.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use kinesis_relay::{KinesisSource, ServerConfig, StreamServer};
//!
//! # async fn run() -> kinesis_relay::Result<()> {
//! let config = ServerConfig::default();
//! let source = Arc::new(KinesisSource::new(config.regions()).await);
//! let server = StreamServer::new(config, source);
//!
//! server
//!     .run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! # }
//! ```

pub mod error;
pub mod registry;
pub mod server;
pub mod session;
pub mod source;
pub mod stats;

pub use error::{Error, Result};
pub use registry::{
    DispatchConfig, DispatchHandle, Dispatcher, RecordMessage, StreamKey, Subscriber,
};
pub use server::{ServerConfig, StreamServer};
pub use session::{ClientSession, Envelope};
pub use source::{KinesisSource, LogSource, MemorySource, ReaderConfig};
