//! Signaling channel loop
//!
//! ```text
//!  connect ──► resolve stream ──► codecs ready? ──no──► {error} ──► end
//!                                     │yes
//!                                     ▼
//!              ┌──────────── read request ◄──────────────┐
//!              │                  │                      │
//!        close/eof          chunked-stream ──spawn──►────┤
//!              │            peer-connection ─spawn──►────┤
//!              ▼            unknown type ───────────►────┘
//!   cancel chunked sessions       malformed ──► end loop
//! ```
//!
//! Spawned sessions outlive a malformed message. A close frame (or the
//! inbound stream ending) disconnects the chunked-stream sessions; peer
//! connections have their own liveness.

use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::channel::{ChannelWriter, Inbound};
use super::message::{Request, Response};
use crate::error::{Error, Result};
use crate::server::AppState;
use crate::session::{negotiate, SessionController, SessionOutcome, Transport};
use crate::transport::ChunkSink;

/// Run one signaling channel for `stream` until the client leaves
///
/// Returns the handles of the sessions the channel spawned. Each resolves to
/// the session's outcome, or `None` if it never started.
pub async fn serve_channel<S>(
    state: AppState,
    stream: String,
    inbound: S,
    writer: ChannelWriter,
) -> Vec<JoinHandle<Option<SessionOutcome>>>
where
    S: Stream<Item = Inbound> + Send,
{
    let mut sessions = Vec::new();

    if let Err(e) = open(&state, &stream).await {
        tracing::warn!(stream = %stream, error = %e, "Signaling channel refused");
        report(&writer, &e.to_string()).await;
        return sessions;
    }

    tracing::debug!(stream = %stream, "Signaling channel open");

    let disconnected = CancellationToken::new();
    let mut inbound = std::pin::pin!(inbound);

    while let Some(frame) = inbound.next().await {
        let text = match frame {
            Inbound::Text(text) => text,
            Inbound::Binary(_) => continue,
            Inbound::Close => break,
        };

        let request: Request = match serde_json::from_str(&text) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(stream = %stream, error = %e, "Malformed signaling message");
                return sessions;
            }
        };

        let handle = match request.transport() {
            Some(Transport::ChunkedStream) => tokio::spawn(run_chunked(
                state.clone(),
                stream.clone(),
                request.kind,
                writer.clone(),
                disconnected.child_token(),
            )),
            Some(Transport::PeerConnection) => tokio::spawn(run_peer(
                state.clone(),
                stream.clone(),
                request.kind,
                request.sdp.unwrap_or_default(),
                writer.clone(),
            )),
            None => {
                tracing::debug!(stream = %stream, kind = %request.kind, "Ignoring request");
                continue;
            }
        };
        sessions.push(handle);
    }

    tracing::debug!(stream = %stream, "Signaling client disconnected");
    disconnected.cancel();
    sessions
}

/// Resolve and activate the stream, requiring codecs
async fn open(state: &AppState, stream: &str) -> Result<()> {
    if stream.is_empty() {
        return Err(Error::StreamNotFound(String::new()));
    }

    let registry = &state.registry;
    if state.config.allow_dynamic_streams {
        registry.ensure_stream(stream).await;
    } else if !registry.exists(stream).await {
        return Err(Error::StreamNotFound(stream.to_string()));
    }

    match registry.codecs_for(stream).await {
        Some(_) => Ok(()),
        None => Err(codecs_not_ready(state, stream).await),
    }
}

/// Prefer the worker's own error over a generic "not ready"
async fn codecs_not_ready(state: &AppState, stream: &str) -> Error {
    match state.registry.entry(stream).await.and_then(|e| e.last_error()) {
        Some(message) => Error::ActivationFailed(message),
        None => Error::CodecsNotReady(stream.to_string()),
    }
}

async fn report(writer: &ChannelWriter, message: &str) {
    if let Err(e) = writer.send_json(&Response::error(message)).await {
        tracing::debug!(error = %e, "Failed to send signaling error");
    }
}

async fn run_chunked(
    state: AppState,
    stream: String,
    kind: String,
    writer: ChannelWriter,
    disconnected: CancellationToken,
) -> Option<SessionOutcome> {
    let session = async {
        let permit = state.acquire_session()?;
        let codecs = state
            .registry
            .codecs_for(&stream)
            .await
            .ok_or_else(|| Error::CodecsNotReady(stream.clone()))?;

        let negotiated = negotiate(&stream, &codecs, Transport::ChunkedStream);
        let sink = ChunkSink::start(writer.clone(), &negotiated, &kind).await?;

        Ok::<_, Error>(
            SessionController::attach(&state.registry, &stream, negotiated, sink)
                .await?
                .disconnect_on(disconnected)
                .liveness_window(state.config.liveness_window)
                .with_permit(permit),
        )
    };

    match session.await {
        Ok(session) => Some(session.run().await),
        Err(e) => {
            tracing::warn!(stream = %stream, error = %e, "Chunked stream not started");
            report(&writer, &e.to_string()).await;
            None
        }
    }
}

async fn run_peer(
    state: AppState,
    stream: String,
    kind: String,
    sdp: String,
    writer: ChannelWriter,
) -> Option<SessionOutcome> {
    let (session, answer) = match state.prepare_peer_session(&stream, &sdp).await {
        Ok(prepared) => prepared,
        Err(e) => {
            tracing::warn!(stream = %stream, error = %e, "Peer connection not started");
            report(&writer, &e.to_string()).await;
            return None;
        }
    };

    if let Err(e) = writer.send_json(&Response::answer(kind, answer)).await {
        // Dropping the session detaches it and closes the peer connection
        tracing::warn!(stream = %stream, error = %e, "Failed to send answer");
        return None;
    }

    Some(session.run().await)
}
