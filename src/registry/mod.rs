//! Subscription registry and record fan-out
//!
//! The registry maps each stream to the set of subscribers interested in it
//! and owns the lifecycle of the stream's shard readers. A single dispatcher
//! task holds it; everything else talks to that task through a
//! [`DispatchHandle`].
//!
//! # Architecture
//!
//! ```text
//!   [Session]  [Session]            [ShardReader] [ShardReader]
//!       │          │                      │             │
//!  subscribe / unsubscribe            RecordMessage (mpsc, 50)
//!       │          │                      │             │
//!       ▼          ▼                      ▼             ▼
//!   ┌──────────────────────────────────────────────────────┐
//!   │ Dispatcher task                                      │
//!   │   Subscriptions { StreamKey -> StreamEntry {         │
//!   │       subscribers: SubscriberSet,                    │
//!   │       cancel: CancellationToken,                     │
//!   │   } }                                                │
//!   └──────────────────────────┬───────────────────────────┘
//!                              │ Subscriber::accept (non-blocking)
//!                   ┌──────────┴──────────┐
//!                   ▼                     ▼
//!             delivery channel      delivery channel
//! ```
//!
//! A stream is present in the registry exactly while it has at least one
//! subscriber, and its readers run exactly while it is present.
//!
//! Payloads are `bytes::Bytes`, so handing one record to many subscribers
//! only bumps a reference count.

pub mod config;
pub mod dispatcher;
pub mod entry;
pub mod error;
pub mod record;
mod store;
pub mod subscriber;

pub use config::DispatchConfig;
pub use dispatcher::{DispatchHandle, Dispatcher, SubscribeOutcome};
pub use entry::{StreamEntry, StreamState, StreamStats, SubscriberSet};
pub use error::RegistryError;
pub use record::{RecordMessage, StreamKey};
pub use subscriber::{Delivery, Subscriber, SubscriberId};
