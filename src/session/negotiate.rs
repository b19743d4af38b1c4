//! Per-transport codec negotiation

use std::fmt;

use serde::Serialize;

use crate::media::{CodecDescriptor, CodecFamily, MediaKind};

/// Delivery transport of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// WebRTC peer connection
    PeerConnection,
    /// Fragmented MP4 over the signaling WebSocket
    ChunkedStream,
}

impl Transport {
    /// Whether this transport can carry `family`
    pub fn accepts(&self, family: CodecFamily) -> bool {
        match self {
            Transport::PeerConnection => matches!(
                family,
                CodecFamily::H264 | CodecFamily::PcmAlaw | CodecFamily::PcmMulaw | CodecFamily::Opus
            ),
            Transport::ChunkedStream => {
                matches!(family, CodecFamily::H264 | CodecFamily::H265 | CodecFamily::Aac)
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::PeerConnection => "peer-connection",
            Transport::ChunkedStream => "chunked-stream",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of filtering a stream's codecs for one transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub transport: Transport,
    /// Accepted tracks, in source order
    pub tracks: Vec<CodecDescriptor>,
    /// Exactly one accepted track and it is audio
    pub audio_only: bool,
}

impl Negotiated {
    /// Whether packets of `track` should be forwarded
    pub fn accepts_track(&self, track: u8) -> bool {
        self.tracks.iter().any(|c| c.track == track)
    }

    pub fn track(&self, track: u8) -> Option<&CodecDescriptor> {
        self.tracks.iter().find(|c| c.track == track)
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Filter `codecs` down to what `transport` can carry
///
/// Dropped tracks are logged, never reported as an error.
pub fn negotiate(stream: &str, codecs: &[CodecDescriptor], transport: Transport) -> Negotiated {
    let mut tracks = Vec::with_capacity(codecs.len());
    for codec in codecs {
        if transport.accepts(codec.family) {
            tracks.push(codec.clone());
        } else {
            tracks_dropped(stream, codec, transport);
        }
    }

    let audio_only = tracks.len() == 1 && tracks[0].is_audio();
    Negotiated {
        transport,
        tracks,
        audio_only,
    }
}

fn tracks_dropped(stream: &str, codec: &CodecDescriptor, transport: Transport) {
    tracing::debug!(
        stream = %stream,
        track = codec.track,
        codec = %codec.family,
        transport = %transport,
        "Track not supported by transport, skipping"
    );
}

/// One entry of the codec query response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackKind {
    #[serde(rename = "type")]
    pub kind: MediaKind,
}

/// Media kinds of the tracks a peer connection would carry
pub fn peer_track_kinds(stream: &str, codecs: &[CodecDescriptor]) -> Vec<TrackKind> {
    negotiate(stream, codecs, Transport::PeerConnection)
        .tracks
        .iter()
        .map(|c| TrackKind { kind: c.kind() })
        .collect()
}
