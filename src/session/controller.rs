//! Session controller
//!
//! One controller per viewer. It owns the viewer's subscription and protocol
//! sink and runs the relay loop:
//!
//! ```text
//!   select! {
//!     client disconnect  ──► Closed(ClientDisconnected)
//!     liveness deadline  ──► Closed(Stalled)
//!     next packet        ──► gate ─► track filter ─► sink.write_packet
//!                                                        │ error
//!                                                        ▼
//!                                               Closed(Transport)
//!   }
//! ```
//!
//! Whatever ends the loop, the subscription is detached once and the sink
//! closed once. The subscription also detaches on drop, so a panic inside
//! the sink still releases it.

use std::time::Duration;

use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::gate::KeyframeGate;
use super::negotiate::Negotiated;
use super::sink::{CloseReason, ProtocolSink};
use crate::error::Result;
use crate::registry::{StreamRegistry, Subscription};
use crate::stats::SessionStats;

/// Default liveness window
pub const LIVENESS_WINDOW: Duration = Duration::from_secs(10);

/// How a session ended
#[derive(Debug)]
pub struct SessionOutcome {
    pub reason: CloseReason,
    pub stats: SessionStats,
}

/// Relay from one subscription to one protocol sink
pub struct SessionController<S> {
    subscription: Subscription,
    negotiated: Negotiated,
    sink: S,
    disconnect: CancellationToken,
    liveness_window: Duration,
    _permit: Option<OwnedSemaphorePermit>,
}

impl<S: ProtocolSink> SessionController<S> {
    /// Attach to `stream` and prepare a session around `sink`
    pub async fn attach(
        registry: &StreamRegistry,
        stream: &str,
        negotiated: Negotiated,
        sink: S,
    ) -> Result<Self> {
        let subscription = registry.attach(stream).await?;
        Ok(Self::with_subscription(subscription, negotiated, sink))
    }

    /// Build a session around an existing subscription
    pub fn with_subscription(subscription: Subscription, negotiated: Negotiated, sink: S) -> Self {
        Self {
            subscription,
            negotiated,
            sink,
            disconnect: CancellationToken::new(),
            liveness_window: LIVENESS_WINDOW,
            _permit: None,
        }
    }

    /// Close the session when `token` is cancelled
    pub fn disconnect_on(mut self, token: CancellationToken) -> Self {
        self.disconnect = token;
        self
    }

    /// Set the liveness window
    pub fn liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }

    /// Hold a session-limit permit for the lifetime of the session
    pub fn with_permit(mut self, permit: Option<OwnedSemaphorePermit>) -> Self {
        self._permit = permit;
        self
    }

    pub fn subscription_id(&self) -> u64 {
        self.subscription.id()
    }

    /// Run until the session closes
    pub async fn run(self) -> SessionOutcome {
        let span = tracing::info_span!(
            "session",
            stream = %self.subscription.stream(),
            subscription = self.subscription.id(),
            transport = %self.negotiated.transport,
        );
        self.relay().instrument(span).await
    }

    async fn relay(mut self) -> SessionOutcome {
        let started = Instant::now();
        let window = self.liveness_window;
        let mut gate = KeyframeGate::new(self.negotiated.audio_only);
        let mut stats = SessionStats::new();

        tracing::info!(
            audio_only = self.negotiated.audio_only,
            tracks = self.negotiated.tracks.len(),
            "Session started"
        );

        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        let reason = loop {
            tokio::select! {
                biased;

                _ = self.disconnect.cancelled() => break CloseReason::ClientDisconnected,

                _ = &mut deadline => break CloseReason::Stalled,

                packet = self.subscription.recv() => {
                    let Some(packet) = packet else {
                        break CloseReason::SourceClosed;
                    };

                    // Dropped tracks never count as activity
                    if !self.negotiated.accepts_track(packet.track) {
                        stats.filtered += 1;
                        continue;
                    }

                    let verdict = gate.on_packet(packet.is_keyframe);
                    if verdict.rearm {
                        deadline.as_mut().reset(Instant::now() + window);
                        stats.deadline_rearms += 1;
                    }
                    if !verdict.forward {
                        stats.discarded_before_keyframe += 1;
                        continue;
                    }

                    if let Err(e) = self.sink.write_packet(&packet).await {
                        break CloseReason::Transport(e);
                    }
                    stats.forwarded += 1;
                    stats.bytes_sent += packet.size() as u64;
                }
            }
        };

        gate.close();
        stats.duration = started.elapsed();

        // Stop queueing before tearing down the transport
        drop(self.subscription);
        self.sink.close(&reason).await;

        tracing::info!(
            reason = %reason,
            forwarded = stats.forwarded,
            discarded = stats.discarded_before_keyframe,
            filtered = stats.filtered,
            duration_ms = stats.duration.as_millis() as u64,
            "Session closed"
        );

        SessionOutcome { reason, stats }
    }
}
