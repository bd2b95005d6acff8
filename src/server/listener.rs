//! Relay server listener
//!
//! Binds the HTTP listener, serves the WebSocket endpoint and owns the
//! dispatcher task for the lifetime of the server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::registry::{DispatchConfig, DispatchHandle, Dispatcher};
use crate::server::config::ServerConfig;
use crate::server::connection::{ws_handler, ConnectionState};
use crate::session::SessionSubscriber;
use crate::source::{LogSource, ReaderConfig};

/// WebSocket relay server
pub struct StreamServer {
    config: ServerConfig,
    source: Arc<dyn LogSource>,
    dispatch: DispatchHandle<SessionSubscriber>,
    shutdown: CancellationToken,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl StreamServer {
    /// Create a server and start its dispatcher
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ServerConfig, source: Arc<dyn LogSource>) -> Self {
        Self::with_configs(config, source, DispatchConfig::default(), ReaderConfig::default())
    }

    /// Create a server with custom dispatcher and reader settings
    pub fn with_configs(
        config: ServerConfig,
        source: Arc<dyn LogSource>,
        dispatch_config: DispatchConfig,
        reader_config: ReaderConfig,
    ) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        let shutdown = CancellationToken::new();
        let (dispatch, _task) = Dispatcher::spawn(
            Arc::clone(&source),
            dispatch_config,
            reader_config,
            shutdown.clone(),
        );

        Self {
            config,
            source,
            dispatch,
            shutdown,
            connection_semaphore,
        }
    }

    /// Handle to the dispatcher shared by every session
    pub fn dispatch(&self) -> &DispatchHandle<SessionSubscriber> {
        &self.dispatch
    }

    /// Router serving the WebSocket endpoint at `/`
    pub fn router(&self) -> Router {
        let state = ConnectionState {
            dispatch: self.dispatch.clone(),
            source: Arc::clone(&self.source),
            options: self.config.session_options(),
            outbound_capacity: self.config.outbound_capacity,
            connection_semaphore: self.connection_semaphore.clone(),
        };

        Router::new().route("/", get(ws_handler)).with_state(state)
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            addr = %addr,
            regions = ?self.config.regions(),
            "Relay server listening"
        );

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutdown signal received");
            })
            .await;

        // Stop the dispatcher and every reader on shutdown
        self.shutdown.cancel();

        result.map_err(Into::into)
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
