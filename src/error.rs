//! Error types
//!
//! `Error` is the crate-wide error. Errors raised before a session starts are
//! reported to the requesting client; errors raised inside a session only end
//! that session.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum Error {
    /// The stream identifier is not registered
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// The stream is known but its ingestion worker has not reported codecs yet
    #[error("stream codecs not ready: {0}")]
    CodecsNotReady(String),

    /// The session description was malformed or could not be answered
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    /// Writing to the client transport failed or timed out
    #[error("transport write error: {0}")]
    TransportWrite(String),

    /// No keyframe (or audio) activity within the liveness window
    #[error("stream stalled")]
    StreamStalled,

    /// The client closed its side of the connection
    #[error("client disconnected")]
    ClientDisconnected,

    /// The ingestion worker failed to start or stopped with an error
    #[error("activation failed: {0}")]
    ActivationFailed(String),

    /// The concurrent session cap was reached
    #[error("session limit reached ({0})")]
    SessionLimitReached(usize),

    /// Media parsing error
    #[error(transparent)]
    Media(#[from] MediaError),

    /// Configuration loading error
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from container and codec parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("invalid FLV header")]
    InvalidFlvHeader,

    #[error("invalid FLV tag")]
    InvalidFlvTag,

    #[error("invalid AVC packet")]
    InvalidAvcPacket,

    #[error("invalid HEVC packet")]
    InvalidHevcPacket,

    #[error("invalid AAC packet")]
    InvalidAacPacket,

    #[error("invalid SPS")]
    InvalidSps,

    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("no tracks to mux")]
    NoTracks,
}

impl From<webrtc::Error> for Error {
    fn from(err: webrtc::Error) -> Self {
        Error::NegotiationFailed(err.to_string())
    }
}
