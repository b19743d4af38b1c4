//! Chunked-stream sink: fragmented MP4 over the signaling channel

use async_trait::async_trait;

use super::fmp4::FragmentedMuxer;
use crate::error::Result;
use crate::media::MediaPacket;
use crate::session::{CloseReason, Negotiated, ProtocolSink};
use crate::signaling::channel::{ChannelWriter, Frame};
use crate::signaling::message::Response;

/// Message sent to the client when the session stalls
pub const NO_VIDEO: &str = "No video";

/// Writes one fragment per packet as a binary frame
#[derive(Debug)]
pub struct ChunkSink {
    writer: ChannelWriter,
    muxer: FragmentedMuxer,
}

impl ChunkSink {
    /// Build the muxer, then announce the codecs and send the init segment
    ///
    /// `kind` is echoed as the announcement's `type`.
    pub async fn start(writer: ChannelWriter, negotiated: &Negotiated, kind: &str) -> Result<Self> {
        let muxer = FragmentedMuxer::new(&negotiated.tracks)?;
        let codecs = muxer.codecs();

        writer.send_json(&Response::codecs(kind, codecs.as_str())).await?;
        writer.send(Frame::Binary(muxer.init_segment())).await?;

        tracing::debug!(codecs = %codecs, "Sent init segment");
        Ok(Self { writer, muxer })
    }

    pub fn codecs(&self) -> String {
        self.muxer.codecs()
    }
}

#[async_trait]
impl ProtocolSink for ChunkSink {
    async fn write_packet(&mut self, packet: &MediaPacket) -> Result<()> {
        match self.muxer.fragment(packet) {
            Some(fragment) => self.writer.send(Frame::Binary(fragment)).await,
            None => Ok(()),
        }
    }

    async fn close(&mut self, reason: &CloseReason) {
        // The channel itself belongs to the gateway and stays open
        if reason.is_stalled() {
            if let Err(e) = self.writer.send_json(&Response::error(NO_VIDEO)).await {
                tracing::debug!(error = %e, "Failed to report stall");
            }
        }
    }
}
