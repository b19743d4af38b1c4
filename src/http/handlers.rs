//! HTTP handlers

use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::StreamExt;
use serde::Deserialize;

use super::error::ApiError;
use crate::error::Error;
use crate::server::AppState;
use crate::session::{peer_track_kinds, TrackKind};
use crate::signaling::{serve_channel, ChannelWriter, Inbound};

/// Form body of `POST /stream/receiver/{id}`
#[derive(Debug, Default, Deserialize)]
pub struct ReceiverForm {
    /// Stream id; the path id is used when absent
    #[serde(default)]
    pub suuid: Option<String>,
    /// Base64 SDP offer
    #[serde(default)]
    pub data: String,
}

/// One-shot peer-connection negotiation
///
/// Answers with the base64 SDP answer as the raw body, then runs the session
/// in the background.
pub async fn receiver(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<ReceiverForm>,
) -> Result<String, ApiError> {
    let stream = form.suuid.filter(|s| !s.is_empty()).unwrap_or(id);

    if !state.registry.exists(&stream).await {
        return Err(Error::StreamNotFound(stream).into());
    }

    let offer = STANDARD
        .decode(form.data.trim())
        .ok()
        .and_then(|raw| String::from_utf8(raw).ok())
        .ok_or_else(|| Error::NegotiationFailed("offer is not base64 SDP".into()))?;

    let (session, answer) = state.prepare_peer_session(&stream, &offer).await?;
    tokio::spawn(session.run());

    Ok(STANDARD.encode(answer))
}

/// Kinds of the tracks a peer connection would carry
pub async fn codec(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TrackKind>>, ApiError> {
    if !state.registry.exists(&id).await {
        return Err(Error::StreamNotFound(id).into());
    }

    let codecs = state
        .registry
        .codecs_for(&id)
        .await
        .ok_or_else(|| Error::CodecsNotReady(id.clone()))?;

    Ok(Json(peer_track_kinds(&id, &codecs)))
}

/// Known streams with their state
pub async fn list(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.stream_infos().await)
}

/// Hub counters
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.hub().stats())
}

#[derive(Debug, Default, Deserialize)]
pub struct SignalingQuery {
    #[serde(default)]
    pub url: String,
}

/// Upgrade to the signaling WebSocket
pub async fn signaling(
    State(state): State<AppState>,
    Query(query): Query<SignalingQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let (sink, source) = socket.split();
        let writer = ChannelWriter::websocket(sink, state.config.write_deadline);

        // A read error ends the channel like a close frame
        let inbound = source.filter_map(|message| {
            futures::future::ready(match message {
                Ok(message) => Inbound::from_message(message),
                Err(_) => Some(Inbound::Close),
            })
        });

        serve_channel(state, query.url, inbound, writer).await;
    })
}

pub async fn fallback() -> StatusCode {
    StatusCode::NOT_FOUND
}
