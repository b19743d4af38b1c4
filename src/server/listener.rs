//! Relay server listener
//!
//! Binds the HTTP listener, starts always-on streams and serves the router.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::error::Result;
use crate::http;
use crate::ingest::{FlvIngest, Ingest};
use crate::registry::{StreamConfig, StreamRegistry};
use crate::server::config::ServerConfig;
use crate::server::state::AppState;

/// Live media relay server
pub struct RelayServer {
    state: AppState,
}

impl RelayServer {
    /// Create a server that ingests FLV sources
    pub fn new(config: ServerConfig) -> Self {
        Self::with_ingest(config, Arc::new(FlvIngest::new()))
    }

    /// Create a server with a custom ingestion worker
    pub fn with_ingest(config: ServerConfig, ingest: Arc<dyn Ingest>) -> Self {
        let registry = Arc::new(StreamRegistry::new(config.registry.clone(), ingest));
        Self {
            state: AppState::new(registry, config),
        }
    }

    /// Get a reference to the stream registry
    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.state.registry
    }

    /// Shared gateway state
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Register a stream
    pub async fn add_stream(&self, id: &str, config: StreamConfig) {
        self.state.registry.add_stream(id, config).await;
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
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.state.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "Relay server listening");

        self.state.registry.start_always_on().await;

        let app = http::router(self.state.clone());
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        Ok(())
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.state.config.bind_addr
    }
}
