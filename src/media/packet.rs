//! Media packets as they travel from the ingestion worker to sessions
//!
//! Packets are cheap to clone: the payload is a reference-counted `Bytes`, so
//! fanning one packet out to many subscriber queues shares a single
//! allocation.

use std::time::Duration;

use bytes::Bytes;

/// One encoded frame of one track
#[derive(Debug, Clone)]
pub struct MediaPacket {
    /// Track index, matches `CodecDescriptor::track`
    pub track: u8,
    /// Whether this packet starts a decodable sequence (video IDR)
    pub is_keyframe: bool,
    /// Decode timestamp relative to the start of the source
    pub time: Duration,
    /// Presentation offset from `time` (B-frames)
    pub composition_time: Duration,
    /// Encoded payload. Video is length-prefixed NAL units (AVCC layout),
    /// audio is a raw frame.
    pub data: Bytes,
}

impl MediaPacket {
    /// Create a video packet
    pub fn video(track: u8, time: Duration, data: Bytes, is_keyframe: bool) -> Self {
        Self {
            track,
            is_keyframe,
            time,
            composition_time: Duration::ZERO,
            data,
        }
    }

    /// Create an audio packet
    pub fn audio(track: u8, time: Duration, data: Bytes) -> Self {
        Self {
            track,
            is_keyframe: false,
            time,
            composition_time: Duration::ZERO,
            data,
        }
    }

    /// Set the composition offset
    pub fn with_composition_time(mut self, composition_time: Duration) -> Self {
        self.composition_time = composition_time;
        self
    }

    /// Presentation timestamp
    pub fn pts(&self) -> Duration {
        self.time + self.composition_time
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}
