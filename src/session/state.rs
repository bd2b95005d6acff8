//! Client session state
//!
//! Tracks one connected client's subscriptions from the first message to
//! disconnection. The session is driven by its connection's read loop; it
//! never touches the socket itself, only the outbound queue the write loop
//! drains.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::protocol::{Envelope, Request, StreamRequest};
use super::stream::{SessionSubscriber, StreamConsumer};
use crate::error::{Error, Result};
use crate::registry::{DispatchHandle, StreamKey, SubscribeOutcome, SubscriberId};
use crate::source::LogSource;
use crate::stats::SessionStats;

/// Settings shared by every session of a server
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Region used when a request names none
    pub default_region: String,
    /// Capacity of each per-stream delivery channel
    pub delivery_capacity: usize,
}

/// One connected client
pub struct ClientSession {
    id: SubscriberId,
    options: SessionOptions,
    outbound: mpsc::Sender<Envelope>,
    dispatch: DispatchHandle<SessionSubscriber>,
    source: Arc<dyn LogSource>,
    subscriptions: HashMap<StreamKey, CancellationToken>,
    decode_errors: Arc<AtomicU64>,
    stats: SessionStats,
}

impl ClientSession {
    /// Create a session with a fresh id
    pub fn new(
        outbound: mpsc::Sender<Envelope>,
        dispatch: DispatchHandle<SessionSubscriber>,
        source: Arc<dyn LogSource>,
        options: SessionOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            options,
            outbound,
            dispatch,
            source,
            subscriptions: HashMap::new(),
            decode_errors: Arc::new(AtomicU64::new(0)),
            stats: SessionStats::new(),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Streams this session currently receives
    pub fn subscriptions(&self) -> impl Iterator<Item = &StreamKey> {
        self.subscriptions
            .iter()
            .filter(|(_, cancel)| !cancel.is_cancelled())
            .map(|(key, _)| key)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            ..self.stats.clone()
        }
    }

    /// Handle one raw frame
    pub async fn handle_frame(&mut self, frame: &[u8]) -> Result<()> {
        match Envelope::from_slice(frame) {
            Ok(envelope) => self.handle(envelope).await,
            Err(e) => {
                self.stats.messages_received += 1;
                tracing::warn!(session = %self.id, error = %e, "Undecodable frame");
                self.send(Envelope::error(e.to_string())).await
            }
        }
    }

    /// Handle one inbound message
    ///
    /// Malformed payloads are answered with an `error` message and the
    /// session stays open. An `Err` means the session cannot continue.
    pub async fn handle(&mut self, envelope: Envelope) -> Result<()> {
        self.stats.messages_received += 1;

        let request = match Request::decode(envelope) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "Malformed request");
                return self.send(Envelope::error(e.to_string())).await;
            }
        };

        match request {
            Request::Open => {
                tracing::debug!(session = %self.id, "Client connected");
                self.send(Envelope::connection_open()).await
            }
            Request::Subscribe(req) => self.subscribe(&req).await,
            Request::Unsubscribe(req) => self.unsubscribe(&req).await,
            Request::ListStreams => self.list_streams().await,
            Request::Unknown(name) => {
                tracing::debug!(session = %self.id, name = %name, "No handler for message");
                Ok(())
            }
        }
    }

    /// Start receiving a stream
    ///
    /// The subscription is recorded before the dispatcher is asked, so a
    /// caller dropped mid-request still leaves something for [`close`]
    /// to release.
    ///
    /// [`close`]: ClientSession::close
    pub async fn subscribe(&mut self, req: &StreamRequest) -> Result<()> {
        let stream = req.key(&self.options.default_region);

        if let Some(cancel) = self.subscriptions.get(&stream) {
            if !cancel.is_cancelled() {
                tracing::warn!(session = %self.id, stream = %stream, "Already subscribed");
                return Ok(());
            }
        }

        let (subscriber, records) =
            SessionSubscriber::channel(self.id, self.options.delivery_capacity);

        let cancel = CancellationToken::new();
        let consumer = StreamConsumer {
            session: self.id,
            stream: stream.clone(),
            records,
            outbound: self.outbound.clone(),
            cancel: cancel.clone(),
            decode_errors: Arc::clone(&self.decode_errors),
        };
        tokio::spawn(consumer.run());
        self.subscriptions.insert(stream.clone(), cancel.clone());

        match self.dispatch.subscribe(stream.clone(), subscriber).await {
            Ok(SubscribeOutcome::Added) => {}
            Ok(SubscribeOutcome::AlreadySubscribed) => {
                tracing::warn!(session = %self.id, stream = %stream, "Dispatcher already had this subscription");
            }
            Err(e) => {
                cancel.cancel();
                self.subscriptions.remove(&stream);
                return Err(e);
            }
        }

        tracing::info!(session = %self.id, stream = %stream, "Subscribed");
        Ok(())
    }

    /// Stop receiving a stream
    pub async fn unsubscribe(&mut self, req: &StreamRequest) -> Result<()> {
        let stream = req.key(&self.options.default_region);
        self.release(stream).await
    }

    /// Answer with the streams of every configured region
    pub async fn list_streams(&mut self) -> Result<()> {
        match self.source.list_streams().await {
            Ok(streams) => self.send(Envelope::list_of_streams(&streams)).await,
            Err(e) => {
                tracing::error!(session = %self.id, error = %e, "Failed to list streams");
                self.send(Envelope::error(e.to_string())).await
            }
        }
    }

    /// Unsubscribe from everything and close the outbound queue
    pub async fn close(mut self) {
        let streams: Vec<StreamKey> = self.subscriptions.keys().cloned().collect();
        for stream in streams {
            if let Err(Error::DispatcherClosed) = self.release(stream).await {
                break;
            }
        }

        let stats = self.stats();
        tracing::debug!(
            session = %self.id,
            received = stats.messages_received,
            sent = stats.messages_sent,
            decode_errors = stats.decode_errors,
            duration_ms = stats.duration().as_millis() as u64,
            "Session closed"
        );
    }

    /// Stop delivery and unsubscribe; the entry stays in the map until the
    /// dispatcher has answered
    async fn release(&mut self, stream: StreamKey) -> Result<()> {
        if let Some(cancel) = self.subscriptions.get(&stream) {
            cancel.cancel();
        }

        let result = self.dispatch.unsubscribe(stream.clone(), self.id).await;
        self.subscriptions.remove(&stream);

        match result {
            Ok(()) => {
                tracing::info!(session = %self.id, stream = %stream, "Unsubscribed");
                Ok(())
            }
            Err(Error::Registry(e)) => {
                tracing::warn!(session = %self.id, stream = %stream, error = %e, "Unsubscribe ignored");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn send(&mut self, envelope: Envelope) -> Result<()> {
        self.outbound
            .send(envelope)
            .await
            .map_err(|_| Error::SessionClosed)?;
        self.stats.messages_sent += 1;
        Ok(())
    }
}
