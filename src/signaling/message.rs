//! Signaling channel JSON messages

use serde::{Deserialize, Serialize};

use crate::session::Transport;

/// Inbound request: `{"type": ..., "sdp": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub sdp: Option<String>,
}

impl Request {
    /// Transport requested, accepting the short aliases `mse` and `webrtc`
    pub fn transport(&self) -> Option<Transport> {
        match self.kind.as_str() {
            "chunked-stream" | "mse" => Some(Transport::ChunkedStream),
            "peer-connection" | "webrtc" => Some(Transport::PeerConnection),
            _ => None,
        }
    }
}

/// Outbound message. Absent fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Response {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codecs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Chunked-stream announcement carrying the MSE codecs string
    pub fn codecs(kind: impl Into<String>, codecs: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            codecs: Some(codecs.into()),
            ..Default::default()
        }
    }

    /// Peer-connection answer
    pub fn answer(kind: impl Into<String>, sdp: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            sdp: Some(sdp.into()),
            ..Default::default()
        }
    }
}
