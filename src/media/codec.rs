//! Codec descriptors
//!
//! A `CodecDescriptor` is reported once per track by the ingestion worker and
//! never changes afterwards. Sessions use it both to filter tracks for their
//! transport and to build the transport's handshake (SDP tracks or the
//! fragmented MP4 init segment).

use bytes::Bytes;
use serde::Serialize;

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codec family of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecFamily {
    /// H.264 / AVC
    H264,
    /// H.265 / HEVC
    H265,
    /// AAC (raw frames, no ADTS)
    Aac,
    /// G.711 A-law
    PcmAlaw,
    /// G.711 mu-law
    PcmMulaw,
    /// Opus
    Opus,
    /// MP3
    Mp3,
    /// Anything else the source carries
    Other,
}

impl CodecFamily {
    /// Media kind of this family
    pub fn kind(&self) -> MediaKind {
        match self {
            CodecFamily::H264 | CodecFamily::H265 | CodecFamily::Other => MediaKind::Video,
            CodecFamily::Aac
            | CodecFamily::PcmAlaw
            | CodecFamily::PcmMulaw
            | CodecFamily::Opus
            | CodecFamily::Mp3 => MediaKind::Audio,
        }
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            CodecFamily::H264 => "H264",
            CodecFamily::H265 => "H265",
            CodecFamily::Aac => "AAC",
            CodecFamily::PcmAlaw => "PCM_ALAW",
            CodecFamily::PcmMulaw => "PCM_MULAW",
            CodecFamily::Opus => "OPUS",
            CodecFamily::Mp3 => "MP3",
            CodecFamily::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for CodecFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Description of one track of a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecDescriptor {
    /// Track index, matches `MediaPacket::track`
    pub track: u8,
    /// Codec family
    pub family: CodecFamily,
    /// Decoder configuration record (avcC, hvcC or AudioSpecificConfig).
    /// Empty for codecs that carry none (G.711, Opus).
    pub config: Bytes,
}

impl CodecDescriptor {
    pub fn new(track: u8, family: CodecFamily, config: Bytes) -> Self {
        Self {
            track,
            family,
            config,
        }
    }

    /// Descriptor for a codec without a decoder configuration record
    pub fn bare(track: u8, family: CodecFamily) -> Self {
        Self::new(track, family, Bytes::new())
    }

    pub fn kind(&self) -> MediaKind {
        self.family.kind()
    }

    pub fn is_video(&self) -> bool {
        self.kind() == MediaKind::Video
    }

    pub fn is_audio(&self) -> bool {
        self.kind() == MediaKind::Audio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_kind() {
        assert_eq!(CodecFamily::H264.kind(), MediaKind::Video);
        assert_eq!(CodecFamily::H265.kind(), MediaKind::Video);
        assert_eq!(CodecFamily::Aac.kind(), MediaKind::Audio);
        assert_eq!(CodecFamily::PcmAlaw.kind(), MediaKind::Audio);
        assert_eq!(CodecFamily::PcmMulaw.kind(), MediaKind::Audio);
        assert_eq!(CodecFamily::Opus.kind(), MediaKind::Audio);
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        let json = serde_json::to_string(&MediaKind::Video).unwrap();
        assert_eq!(json, "\"video\"");
    }
}
