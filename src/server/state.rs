//! Shared state handed to every gateway

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};
use crate::registry::StreamRegistry;
use crate::server::config::ServerConfig;
use crate::session::{negotiate, SessionController, Transport};
use crate::transport::{PeerOptions, PeerSink};

/// Registry, configuration and the session limiter
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<StreamRegistry>,
    pub config: Arc<ServerConfig>,
    limiter: Option<Arc<Semaphore>>,
}

impl AppState {
    pub fn new(registry: Arc<StreamRegistry>, config: ServerConfig) -> Self {
        let limiter = if config.max_sessions > 0 {
            Some(Arc::new(Semaphore::new(config.max_sessions)))
        } else {
            None
        };

        Self {
            registry,
            config: Arc::new(config),
            limiter,
        }
    }

    /// Reserve a session slot. `Ok(None)` when sessions are unlimited.
    pub fn acquire_session(&self) -> Result<Option<OwnedSemaphorePermit>> {
        let Some(limiter) = &self.limiter else {
            return Ok(None);
        };

        match Arc::clone(limiter).try_acquire_owned() {
            Ok(permit) => Ok(Some(permit)),
            Err(_) => {
                tracing::warn!(
                    limit = self.config.max_sessions,
                    "Session rejected: limit reached"
                );
                Err(Error::SessionLimitReached(self.config.max_sessions))
            }
        }
    }

    /// Free session slots, if sessions are limited
    pub fn available_sessions(&self) -> Option<usize> {
        self.limiter.as_ref().map(|l| l.available_permits())
    }

    pub fn peer_options(&self) -> PeerOptions {
        PeerOptions::from_registry(&self.registry)
    }

    /// Negotiate a peer connection for `stream` and prepare its session
    ///
    /// The caller delivers the returned answer SDP and then runs the
    /// session. The stream must already be known.
    pub async fn prepare_peer_session(
        &self,
        stream: &str,
        offer_sdp: &str,
    ) -> Result<(SessionController<PeerSink>, String)> {
        let permit = self.acquire_session()?;
        let codecs = self
            .registry
            .codecs_for(stream)
            .await
            .ok_or_else(|| Error::CodecsNotReady(stream.to_string()))?;

        let negotiated = negotiate(stream, &codecs, Transport::PeerConnection);
        let (sink, answer) = PeerSink::answer(&self.peer_options(), &negotiated, offer_sdp).await?;
        let disconnect = sink.disconnected();

        let session = SessionController::attach(&self.registry, stream, negotiated, sink)
            .await?
            .disconnect_on(disconnect)
            .liveness_window(self.config.liveness_window)
            .with_permit(permit);

        Ok((session, answer))
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("available_sessions", &self.available_sessions())
            .finish()
    }
}
