//! Protocol sink capability

use std::fmt;

use async_trait::async_trait;

use crate::error::Error;
use crate::media::MediaPacket;

/// Why a session ended
#[derive(Debug)]
pub enum CloseReason {
    /// No keyframe (or audio) within the liveness window
    Stalled,
    /// The sink failed to write
    Transport(Error),
    /// The client went away
    ClientDisconnected,
    /// The subscription was detached from outside
    SourceClosed,
}

impl CloseReason {
    /// The error this reason represents, if any
    pub fn into_error(self) -> Option<Error> {
        match self {
            CloseReason::Stalled => Some(Error::StreamStalled),
            CloseReason::Transport(e) => Some(e),
            CloseReason::ClientDisconnected => Some(Error::ClientDisconnected),
            CloseReason::SourceClosed => None,
        }
    }

    pub fn is_stalled(&self) -> bool {
        matches!(self, CloseReason::Stalled)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Stalled => f.write_str("stream stalled"),
            CloseReason::Transport(e) => write!(f, "transport error: {}", e),
            CloseReason::ClientDisconnected => f.write_str("client disconnected"),
            CloseReason::SourceClosed => f.write_str("source closed"),
        }
    }
}

/// Transport-specific writer driven by a `SessionController`
///
/// The controller calls `write_packet` only for gated, negotiated packets
/// and calls `close` exactly once when the session ends.
#[async_trait]
pub trait ProtocolSink: Send {
    /// Write one packet to the client
    async fn write_packet(&mut self, packet: &MediaPacket) -> crate::error::Result<()>;

    /// Release the transport
    async fn close(&mut self, reason: &CloseReason);
}
