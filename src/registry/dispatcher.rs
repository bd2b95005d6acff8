//! Dispatcher task
//!
//! A single task owns the [`Subscriptions`] registry. Subscribe and
//! unsubscribe requests arrive on its command mailbox, records arrive on the
//! channel shared by all shard readers, and the task applies both one at a
//! time, so the registry needs no lock.
//!
//! Stream start-up does not block the loop: the registry entry is created
//! immediately and a launcher task waits for the stream to become active
//! before spawning the shard readers. Readers of a stream never fetch before
//! the stream is active.
//!
//! Shutdown is best effort: when the shutdown token fires the loop exits
//! without draining queued commands or records, and every reader is
//! cancelled.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::config::DispatchConfig;
use super::error::RegistryError;
use super::record::{RecordMessage, StreamKey};
use super::store::{Subscribed, Subscriptions, Unsubscribed};
use super::subscriber::{Subscriber, SubscriberId};
use crate::error::{Error, Result};
use crate::source::{wait_until_active, LogSource, ReaderConfig, ShardReader};
use crate::stats::{DispatchSnapshot, DispatchStats};

/// Result of a subscribe request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Subscriber was added
    Added,
    /// Subscriber was already subscribed; nothing changed
    AlreadySubscribed,
}

enum Command<S> {
    Subscribe {
        stream: StreamKey,
        subscriber: S,
        reply: oneshot::Sender<SubscribeOutcome>,
    },
    Unsubscribe {
        stream: StreamKey,
        id: SubscriberId,
        reply: oneshot::Sender<std::result::Result<(), RegistryError>>,
    },
    Snapshot {
        reply: oneshot::Sender<DispatchSnapshot>,
    },
}

/// Reports from launcher tasks
enum Lifecycle {
    Started {
        stream: StreamKey,
        generation: u64,
        shards: usize,
    },
    Failed {
        stream: StreamKey,
        generation: u64,
        error: String,
    },
}

/// Cloneable handle for talking to the dispatcher task
pub struct DispatchHandle<S> {
    commands: mpsc::Sender<Command<S>>,
    records: mpsc::Sender<RecordMessage>,
    readers: TaskTracker,
}

impl<S> Clone for DispatchHandle<S> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            records: self.records.clone(),
            readers: self.readers.clone(),
        }
    }
}

impl<S: Subscriber> DispatchHandle<S> {
    /// Subscribe `subscriber` to `stream`
    ///
    /// The first subscriber of a stream starts its readers.
    pub async fn subscribe(&self, stream: StreamKey, subscriber: S) -> Result<SubscribeOutcome> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Subscribe {
                stream,
                subscriber,
                reply,
            })
            .await
            .map_err(|_| Error::DispatcherClosed)?;
        rx.await.map_err(|_| Error::DispatcherClosed)
    }

    /// Unsubscribe `id` from `stream`
    ///
    /// Fails with a registry error if the subscriber was not subscribed;
    /// nothing is modified in that case. The last subscriber leaving stops
    /// the stream's readers.
    pub async fn unsubscribe(&self, stream: StreamKey, id: SubscriberId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Unsubscribe { stream, id, reply })
            .await
            .map_err(|_| Error::DispatcherClosed)?;
        rx.await
            .map_err(|_| Error::DispatcherClosed)?
            .map_err(Error::from)
    }

    /// Feed a record into the fan-out path, as a reader would
    pub async fn publish(&self, record: RecordMessage) -> Result<()> {
        self.records
            .send(record)
            .await
            .map_err(|_| Error::DispatcherClosed)
    }

    /// Registry and counter snapshot
    pub async fn snapshot(&self) -> Result<DispatchSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| Error::DispatcherClosed)?;
        rx.await.map_err(|_| Error::DispatcherClosed)
    }

    /// Number of shard reader tasks still alive
    pub fn running_readers(&self) -> usize {
        self.readers.len()
    }

    /// Whether the dispatcher task has stopped
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// The dispatcher task state
pub struct Dispatcher<S> {
    subscriptions: Subscriptions<S>,
    commands: mpsc::Receiver<Command<S>>,
    records: mpsc::Receiver<RecordMessage>,
    record_tx: mpsc::Sender<RecordMessage>,
    lifecycle: mpsc::UnboundedReceiver<Lifecycle>,
    lifecycle_tx: mpsc::UnboundedSender<Lifecycle>,
    source: Arc<dyn LogSource>,
    reader_config: Arc<ReaderConfig>,
    readers: TaskTracker,
    root: CancellationToken,
    shutdown: CancellationToken,
    stats: DispatchStats,
}

impl<S: Subscriber> Dispatcher<S> {
    /// Start the dispatcher task
    ///
    /// Runs until `shutdown` fires or every handle has been dropped.
    pub fn spawn(
        source: Arc<dyn LogSource>,
        config: DispatchConfig,
        reader_config: ReaderConfig,
        shutdown: CancellationToken,
    ) -> (DispatchHandle<S>, JoinHandle<()>) {
        // mpsc::channel panics on zero capacity
        let (command_tx, commands) = mpsc::channel(config.command_capacity.max(1));
        let (record_tx, records) = mpsc::channel(config.record_capacity.max(1));
        let (lifecycle_tx, lifecycle) = mpsc::unbounded_channel();
        let readers = TaskTracker::new();
        let root = shutdown.child_token();

        let dispatcher = Self {
            subscriptions: Subscriptions::new(root.clone()),
            commands,
            records,
            record_tx: record_tx.clone(),
            lifecycle,
            lifecycle_tx,
            source,
            reader_config: Arc::new(reader_config),
            readers: readers.clone(),
            root,
            shutdown,
            stats: DispatchStats::new(),
        };

        let handle = DispatchHandle {
            commands: command_tx,
            records: record_tx,
            readers,
        };

        (handle, tokio::spawn(dispatcher.run()))
    }

    async fn run(mut self) {
        tracing::info!("Dispatcher started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        tracing::info!("All dispatcher handles dropped");
                        break;
                    }
                },
                Some(event) = self.lifecycle.recv() => self.handle_lifecycle(event),
                Some(record) = self.records.recv() => self.publish(&record),
            }
        }

        self.root.cancel();
        self.readers.close();
        tracing::info!(
            streams = self.subscriptions.stream_count(),
            "Dispatcher stopped"
        );
    }

    fn handle_command(&mut self, command: Command<S>) {
        match command {
            Command::Subscribe {
                stream,
                subscriber,
                reply,
            } => {
                let outcome = match self.subscriptions.subscribe(&stream, subscriber) {
                    Subscribed::NewStream { cancel, generation } => {
                        self.start_stream(stream, cancel, generation);
                        SubscribeOutcome::Added
                    }
                    Subscribed::Joined { subscribers } => {
                        tracing::debug!(stream = %stream, subscribers = subscribers, "Joined running stream");
                        SubscribeOutcome::Added
                    }
                    Subscribed::AlreadySubscribed => SubscribeOutcome::AlreadySubscribed,
                };
                let _ = reply.send(outcome);
            }
            Command::Unsubscribe { stream, id, reply } => {
                let result = self.subscriptions.unsubscribe(&stream, id).map(|outcome| {
                    if outcome == Unsubscribed::StreamClosed {
                        self.stats.streams_stopped += 1;
                    }
                });
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(DispatchSnapshot {
                    streams: self.subscriptions.stats(),
                    stats: self.stats.clone(),
                });
            }
        }
    }

    fn handle_lifecycle(&mut self, event: Lifecycle) {
        match event {
            Lifecycle::Started {
                stream,
                generation,
                shards,
            } => {
                if self.subscriptions.mark_active(&stream, generation, shards) {
                    self.stats.streams_started += 1;
                    tracing::info!(stream = %stream, shards = shards, "Stream readers running");
                }
            }
            Lifecycle::Failed {
                stream,
                generation,
                error,
            } => {
                if self.subscriptions.fail(&stream, generation) {
                    self.stats.streams_stopped += 1;
                    tracing::error!(
                        stream = %stream,
                        error = %error,
                        "Stream start-up failed, subscribers dropped"
                    );
                }
            }
        }
    }

    fn publish(&mut self, record: &RecordMessage) {
        let outcome = self.subscriptions.publish(record);
        match outcome {
            None => {
                tracing::debug!(stream = %record.stream, "Dropping record for stream without subscribers");
            }
            Some(published) if published.stream_closed => self.stats.streams_stopped += 1,
            Some(_) => {}
        }
        self.stats
            .on_publish(outcome.map(|published| (published.accepted, published.dropped)));
    }

    /// Spawn the launcher that waits for the stream and starts its readers
    fn start_stream(&self, stream: StreamKey, cancel: CancellationToken, generation: u64) {
        let source = Arc::clone(&self.source);
        let config = Arc::clone(&self.reader_config);
        let records = self.record_tx.clone();
        let readers = self.readers.clone();
        let lifecycle = self.lifecycle_tx.clone();

        tokio::spawn(async move {
            let description = match wait_until_active(source.as_ref(), &stream, &config, &cancel).await {
                Ok(Some(description)) => description,
                Ok(None) => {
                    tracing::debug!(stream = %stream, "Stream torn down before it became active");
                    return;
                }
                Err(e) => {
                    let _ = lifecycle.send(Lifecycle::Failed {
                        stream,
                        generation,
                        error: e.to_string(),
                    });
                    return;
                }
            };

            if cancel.is_cancelled() || readers.is_closed() {
                return;
            }

            for shard_id in &description.shards {
                let reader = ShardReader::new(
                    Arc::clone(&source),
                    stream.clone(),
                    shard_id.clone(),
                    Arc::clone(&config),
                    records.clone(),
                    cancel.clone(),
                );
                readers.spawn(reader.run());
            }

            let _ = lifecycle.send(Lifecycle::Started {
                stream,
                generation,
                shards: description.shards.len(),
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use bytes::Bytes;
    use uuid::Uuid;

    use super::*;
    use crate::registry::{Delivery, StreamState};
    use crate::source::{MemorySource, StartingPosition, StreamStatus};

    #[derive(Clone)]
    struct MockSubscriber {
        id: SubscriberId,
        received: Arc<Mutex<Vec<RecordMessage>>>,
    }

    impl MockSubscriber {
        fn new() -> Self {
            Self {
                id: Uuid::new_v4(),
                received: Arc::default(),
            }
        }

        fn payloads(&self) -> Vec<Bytes> {
            self.received
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.payload.clone())
                .collect()
        }
    }

    impl Subscriber for MockSubscriber {
        fn id(&self) -> SubscriberId {
            self.id
        }

        fn accept(&self, record: &RecordMessage) -> Delivery {
            self.received.lock().unwrap().push(record.clone());
            Delivery::Accepted
        }
    }

    fn key(name: &str) -> StreamKey {
        StreamKey::new("us-west-2", name)
    }

    fn fast_readers() -> ReaderConfig {
        ReaderConfig::default()
            .fetch_interval(Duration::from_millis(1))
            .retry_backoff(Duration::from_millis(1))
            .topology_poll_interval(Duration::from_millis(5))
    }

    fn spawn_with(
        source: Arc<MemorySource>,
    ) -> (DispatchHandle<MockSubscriber>, CancellationToken) {
        let shutdown = CancellationToken::new();
        let (handle, _task) = Dispatcher::spawn(
            source,
            DispatchConfig::default(),
            fast_readers(),
            shutdown.clone(),
        );
        (handle, shutdown)
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..500 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_pubsub_single_subscriber() {
        let source = Arc::new(MemorySource::new());
        source.create_stream(&key("dummy"), 1).await;
        let (handle, shutdown) = spawn_with(Arc::clone(&source));
        let sub = MockSubscriber::new();

        let outcome = handle.subscribe(key("dummy"), sub.clone()).await.unwrap();
        assert_eq!(outcome, SubscribeOutcome::Added);

        handle
            .publish(RecordMessage::new(key("dummy"), "Hello"))
            .await
            .unwrap();

        eventually(|| {
            let sub = sub.clone();
            async move { sub.payloads() == vec![Bytes::from("Hello")] }
        })
        .await;
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_pubsub_multiple_subscribers() {
        let source = Arc::new(MemorySource::new());
        source.create_stream(&key("dummy"), 1).await;
        source.create_stream(&key("elsewhere"), 1).await;
        let (handle, shutdown) = spawn_with(Arc::clone(&source));
        let (a, b, other) = (MockSubscriber::new(), MockSubscriber::new(), MockSubscriber::new());

        handle.subscribe(key("dummy"), a.clone()).await.unwrap();
        handle.subscribe(key("dummy"), b.clone()).await.unwrap();
        handle.subscribe(key("elsewhere"), other.clone()).await.unwrap();

        handle
            .publish(RecordMessage::new(key("dummy"), "hello"))
            .await
            .unwrap();
        eventually(|| {
            let (a, b) = (a.clone(), b.clone());
            async move { a.payloads().len() == 1 && b.payloads().len() == 1 }
        })
        .await;
        assert_eq!(a.payloads(), vec![Bytes::from("hello")]);
        assert_eq!(b.payloads(), vec![Bytes::from("hello")]);

        handle.unsubscribe(key("dummy"), a.id).await.unwrap();
        handle
            .publish(RecordMessage::new(key("dummy"), "second"))
            .await
            .unwrap();
        eventually(|| {
            let b = b.clone();
            async move { b.payloads().len() == 2 }
        })
        .await;
        assert_eq!(a.payloads(), vec![Bytes::from("hello")]);
        assert_eq!(b.payloads(), vec![Bytes::from("hello"), Bytes::from("second")]);

        handle.unsubscribe(key("dummy"), b.id).await.unwrap();
        handle
            .publish(RecordMessage::new(key("dummy"), "third"))
            .await
            .unwrap();
        eventually(|| {
            let handle = handle.clone();
            async move { handle.snapshot().await.unwrap().stats.records_received == 3 }
        })
        .await;

        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.stream(&key("dummy")).is_none());
        assert_eq!(snapshot.stats.records_without_subscribers, 1);
        assert_eq!(b.payloads().len(), 2);
        assert!(other.payloads().is_empty());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_duplicate_subscribe_and_double_unsubscribe() {
        let source = Arc::new(MemorySource::new());
        source.create_stream(&key("s"), 1).await;
        let (handle, shutdown) = spawn_with(Arc::clone(&source));
        let sub = MockSubscriber::new();

        assert_eq!(
            handle.subscribe(key("s"), sub.clone()).await.unwrap(),
            SubscribeOutcome::Added
        );
        assert_eq!(
            handle.subscribe(key("s"), sub.clone()).await.unwrap(),
            SubscribeOutcome::AlreadySubscribed
        );
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.stream(&key("s")).unwrap().subscriber_count, 1);

        handle
            .publish(RecordMessage::new(key("s"), "once"))
            .await
            .unwrap();
        eventually(|| {
            let handle = handle.clone();
            async move { handle.snapshot().await.unwrap().stats.records_received == 1 }
        })
        .await;
        assert_eq!(sub.payloads(), vec![Bytes::from("once")]);

        handle.unsubscribe(key("s"), sub.id).await.unwrap();
        let second = handle.unsubscribe(key("s"), sub.id).await;
        assert!(matches!(
            second,
            Err(Error::Registry(RegistryError::StreamNotFound(_)))
        ));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let source = Arc::new(MemorySource::new());
        let (handle, shutdown) = spawn_with(source);

        handle
            .publish(RecordMessage::new(key("nobody"), "lost"))
            .await
            .unwrap();
        eventually(|| {
            let handle = handle.clone();
            async move { handle.snapshot().await.unwrap().stats.records_received == 1 }
        })
        .await;

        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.streams.is_empty());
        assert_eq!(snapshot.stats.records_without_subscribers, 1);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_readers_follow_subscriber_count() {
        let source = Arc::new(MemorySource::new());
        source.create_stream(&key("sharded"), 3).await;
        let (handle, shutdown) = spawn_with(Arc::clone(&source));
        let (a, b) = (MockSubscriber::new(), MockSubscriber::new());

        handle.subscribe(key("sharded"), a.clone()).await.unwrap();
        handle.subscribe(key("sharded"), b.clone()).await.unwrap();
        eventually(|| {
            let handle = handle.clone();
            async move {
                let snapshot = handle.snapshot().await.unwrap();
                handle.running_readers() == 3
                    && snapshot.stream(&key("sharded")).map(|s| s.state) == Some(StreamState::Active)
            }
        })
        .await;

        handle.unsubscribe(key("sharded"), a.id).await.unwrap();
        assert_eq!(handle.running_readers(), 3);

        handle.unsubscribe(key("sharded"), b.id).await.unwrap();
        eventually(|| {
            let handle = handle.clone();
            async move { handle.running_readers() == 0 }
        })
        .await;

        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.streams.is_empty());
        assert_eq!(snapshot.stats.streams_started, 1);
        assert_eq!(snapshot.stats.streams_stopped, 1);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_records_flow_from_shards_in_order() {
        let source = Arc::new(MemorySource::new());
        let shards = source.create_stream(&key("ordered"), 2).await;
        for i in 0..20 {
            source
                .put_record(&key("ordered"), &shards[i % 2], format!("{}-{}", i % 2, i))
                .await
                .unwrap();
        }
        let shutdown = CancellationToken::new();
        let (handle, _task) = Dispatcher::spawn(
            source,
            DispatchConfig::default(),
            fast_readers().starting_position(StartingPosition::TrimHorizon),
            shutdown.clone(),
        );
        let sub = MockSubscriber::new();

        handle.subscribe(key("ordered"), sub.clone()).await.unwrap();
        eventually(|| {
            let sub = sub.clone();
            async move { sub.payloads().len() == 20 }
        })
        .await;

        for shard in 0..2 {
            let prefix = format!("{}-", shard);
            let seen: Vec<Bytes> = sub
                .payloads()
                .into_iter()
                .filter(|p| p.starts_with(prefix.as_bytes()))
                .collect();
            let expected: Vec<Bytes> = (0..20)
                .filter(|i| i % 2 == shard)
                .map(|i| Bytes::from(format!("{}-{}", shard, i)))
                .collect();
            assert_eq!(seen, expected);
        }
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_readers_wait_for_active_stream() {
        let source = Arc::new(MemorySource::new());
        source
            .create_stream_with_status(&key("slow"), 1, StreamStatus::Creating)
            .await;
        let (handle, shutdown) = spawn_with(Arc::clone(&source));
        let sub = MockSubscriber::new();

        handle.subscribe(key("slow"), sub.clone()).await.unwrap();
        // The dispatcher keeps serving while the stream starts
        let other = MockSubscriber::new();
        handle.subscribe(key("slow"), other).await.unwrap();

        eventually(|| {
            let source = Arc::clone(&source);
            async move { source.describe_count().await >= 2 }
        })
        .await;
        assert_eq!(source.fetch_count().await, 0);
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.stream(&key("slow")).unwrap().state, StreamState::Starting);

        source.set_status(&key("slow"), StreamStatus::Active).await.unwrap();
        eventually(|| {
            let handle = handle.clone();
            async move { handle.running_readers() == 1 }
        })
        .await;
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_unsubscribe_before_active_launches_nothing() {
        let source = Arc::new(MemorySource::new());
        source
            .create_stream_with_status(&key("never"), 2, StreamStatus::Creating)
            .await;
        let (handle, shutdown) = spawn_with(Arc::clone(&source));
        let sub = MockSubscriber::new();

        handle.subscribe(key("never"), sub.clone()).await.unwrap();
        handle.unsubscribe(key("never"), sub.id).await.unwrap();
        source.set_status(&key("never"), StreamStatus::Active).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(handle.running_readers(), 0);
        assert_eq!(source.fetch_count().await, 0);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_missing_stream_is_removed() {
        let source = Arc::new(MemorySource::new());
        let (handle, shutdown) = spawn_with(Arc::clone(&source));
        let sub = MockSubscriber::new();

        handle.subscribe(key("ghost"), sub.clone()).await.unwrap();

        eventually(|| {
            let handle = handle.clone();
            async move { handle.snapshot().await.unwrap().streams.is_empty() }
        })
        .await;
        assert!(handle.unsubscribe(key("ghost"), sub.id).await.is_err());
        shutdown.cancel();
    }

    struct GoneSubscriber {
        id: SubscriberId,
    }

    impl Subscriber for GoneSubscriber {
        fn id(&self) -> SubscriberId {
            self.id
        }

        fn accept(&self, _record: &RecordMessage) -> Delivery {
            Delivery::Closed
        }
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_removed_and_stream_stopped() {
        let source = Arc::new(MemorySource::new());
        source.create_stream(&key("abandoned"), 2).await;
        let shutdown = CancellationToken::new();
        let (handle, _task) = Dispatcher::<GoneSubscriber>::spawn(
            source,
            DispatchConfig::default(),
            fast_readers(),
            shutdown.clone(),
        );

        handle
            .subscribe(key("abandoned"), GoneSubscriber { id: Uuid::new_v4() })
            .await
            .unwrap();
        eventually(|| {
            let handle = handle.clone();
            async move { handle.running_readers() == 2 }
        })
        .await;

        handle
            .publish(RecordMessage::new(key("abandoned"), "unread"))
            .await
            .unwrap();
        eventually(|| {
            let handle = handle.clone();
            async move { handle.snapshot().await.unwrap().streams.is_empty() }
        })
        .await;
        eventually(|| {
            let handle = handle.clone();
            async move { handle.running_readers() == 0 }
        })
        .await;

        let stats = handle.snapshot().await.unwrap().stats;
        assert_eq!(stats.deliveries_dropped, 1);
        assert_eq!(stats.streams_stopped, 1);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_zero_capacity_fields_are_clamped() {
        let source = Arc::new(MemorySource::new());
        source.create_stream(&key("tiny"), 1).await;
        let shutdown = CancellationToken::new();
        let config = DispatchConfig {
            command_capacity: 0,
            record_capacity: 0,
        };
        let (handle, _task) = Dispatcher::spawn(source, config, fast_readers(), shutdown.clone());
        let sub = MockSubscriber::new();

        handle.subscribe(key("tiny"), sub.clone()).await.unwrap();
        handle
            .publish(RecordMessage::new(key("tiny"), "fits"))
            .await
            .unwrap();
        eventually(|| {
            let sub = sub.clone();
            async move { sub.payloads() == vec![Bytes::from("fits")] }
        })
        .await;
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_stops_readers_and_rejects_requests() {
        let source = Arc::new(MemorySource::new());
        source.create_stream(&key("s"), 2).await;
        let shutdown = CancellationToken::new();
        let (handle, task) = Dispatcher::spawn(
            source,
            DispatchConfig::default(),
            fast_readers(),
            shutdown.clone(),
        );

        handle.subscribe(key("s"), MockSubscriber::new()).await.unwrap();
        eventually(|| {
            let handle = handle.clone();
            async move { handle.running_readers() == 2 }
        })
        .await;

        shutdown.cancel();
        task.await.unwrap();

        eventually(|| {
            let handle = handle.clone();
            async move { handle.running_readers() == 0 }
        })
        .await;
        assert!(handle.is_closed());
        assert!(matches!(
            handle.subscribe(key("s"), MockSubscriber::new()).await,
            Err(Error::DispatcherClosed)
        ));
    }
}
