//! Per-stream delivery for a client session
//!
//! Each subscription owns a bounded delivery channel. The dispatcher pushes
//! raw payloads into it without waiting; a consumer task drains it, decodes
//! each payload and queues `update_data` messages for the client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use super::protocol::{DataPoint, Envelope};
use crate::registry::{Delivery, RecordMessage, StreamKey, Subscriber, SubscriberId};

/// The dispatcher-facing half of one subscription
#[derive(Debug, Clone)]
pub struct SessionSubscriber {
    id: SubscriberId,
    tx: mpsc::Sender<Bytes>,
}

impl SessionSubscriber {
    /// Create a subscriber and the receiving end of its delivery channel
    pub fn channel(id: SubscriberId, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { id, tx }, rx)
    }
}

impl Subscriber for SessionSubscriber {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn accept(&self, record: &RecordMessage) -> Delivery {
        match self.tx.try_send(record.payload.clone()) {
            Ok(()) => Delivery::Accepted,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    session = %self.id,
                    stream = %record.stream,
                    "Delivery channel full, dropping record"
                );
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// Consumer side of one subscription
pub(super) struct StreamConsumer {
    pub session: SubscriberId,
    pub stream: StreamKey,
    pub records: mpsc::Receiver<Bytes>,
    pub outbound: mpsc::Sender<Envelope>,
    pub cancel: CancellationToken,
    pub decode_errors: Arc<AtomicU64>,
}

impl StreamConsumer {
    /// Forward records until cancelled or the delivery channel closes
    ///
    /// The channel closing without a cancel means the dispatcher dropped the
    /// subscription (failed start-up or shutdown); the client is told and
    /// the subscription's token is cancelled so the session can tell it is
    /// gone.
    pub async fn run(mut self) {
        loop {
            let payload = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                payload = self.records.recv() => payload,
            };

            let Some(payload) = payload else {
                tracing::warn!(
                    session = %self.session,
                    stream = %self.stream,
                    "Stream dropped by dispatcher"
                );
                let message = format!("stream {} is no longer available", self.stream);
                self.cancel.cancel();
                let _ = self.outbound.send(Envelope::error(message)).await;
                return;
            };

            let point: DataPoint = match serde_json::from_slice(&payload) {
                Ok(point) => point,
                Err(e) => {
                    self.decode_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        session = %self.session,
                        stream = %self.stream,
                        error = %e,
                        "Skipping undecodable record"
                    );
                    continue;
                }
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                sent = self.outbound.send(Envelope::update_data(&point)) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
