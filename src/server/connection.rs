//! WebSocket connection handling
//!
//! Each upgraded socket is split in two: a write task drains the session's
//! outbound queue into the socket, and the read loop feeds frames into the
//! [`ClientSession`]. Whichever side ends first tears the whole session
//! down. A finished write loop only stops the read loop between frames, so
//! a request in flight always completes before the session is closed.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::registry::DispatchHandle;
use crate::session::{ClientSession, Envelope, SessionOptions, SessionSubscriber};
use crate::source::LogSource;

/// State shared by every connection of a server
#[derive(Clone)]
pub(crate) struct ConnectionState {
    pub dispatch: DispatchHandle<SessionSubscriber>,
    pub source: Arc<dyn LogSource>,
    pub options: SessionOptions,
    pub outbound_capacity: usize,
    pub connection_semaphore: Option<Arc<Semaphore>>,
}

pub(crate) async fn ws_handler(
    State(state): State<ConnectionState>,
    ws: WebSocketUpgrade,
) -> Response {
    // Check connection limit
    let permit = match state.connection_semaphore {
        Some(ref sem) => match Arc::clone(sem).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::warn!("Connection rejected: limit reached");
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
        },
        None => None,
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, permit))
}

async fn handle_socket(
    socket: WebSocket,
    state: ConnectionState,
    _permit: Option<OwnedSemaphorePermit>,
) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Envelope>(state.outbound_capacity.max(1));

    let mut session = ClientSession::new(
        tx,
        state.dispatch.clone(),
        Arc::clone(&state.source),
        state.options.clone(),
    );
    let session_id = session.id();
    tracing::debug!(session = %session_id, "New connection");

    let write_done = CancellationToken::new();
    let send_task = tokio::spawn({
        let write_done = write_done.clone();
        async move {
            let _done = write_done.drop_guard();
            while let Some(envelope) = rx.recv().await {
                let text = match envelope.to_text() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(session = %session_id, error = %e, "Failed to encode message");
                        continue;
                    }
                };
                if let Err(e) = sender.send(Message::Text(text.into())).await {
                    tracing::debug!(session = %session_id, error = %e, "Write failed");
                    break;
                }
            }
            let _ = sender.close().await;
        }
    });

    read_loop(&mut receiver, &mut session, &write_done).await;

    session.close().await;
    send_task.abort();

    tracing::debug!(session = %session_id, "Connection closed");
}

async fn read_loop(
    receiver: &mut SplitStream<WebSocket>,
    session: &mut ClientSession,
    write_done: &CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = write_done.cancelled() => {
                tracing::debug!(session = %session.id(), "Write loop ended");
                return;
            }
            message = receiver.next() => message,
        };

        let message = match message {
            None => {
                tracing::debug!(session = %session.id(), "Read loop ended");
                return;
            }
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                tracing::debug!(session = %session.id(), error = %e, "Read failed");
                return;
            }
        };

        let handled = match message {
            Message::Text(text) => session.handle_frame(text.as_str().as_bytes()).await,
            Message::Binary(data) => session.handle_frame(&data).await,
            Message::Close(frame) => {
                if let Some(cf) = frame {
                    tracing::debug!(
                        session = %session.id(),
                        code = cf.code,
                        reason = %cf.reason.as_str(),
                        "Client closed connection"
                    );
                }
                return;
            }
            Message::Ping(_) | Message::Pong(_) => Ok(()),
        };

        if let Err(e) = handled {
            tracing::debug!(session = %session.id(), error = %e, "Session ended");
            return;
        }
    }
}
