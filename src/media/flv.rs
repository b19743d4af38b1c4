//! FLV container parsing
//!
//! Sources are read as an FLV byte stream (a file, or a TCP feed such as an
//! `ffmpeg -f flv tcp://...` output). The reader yields tags; `FlvTag::payload`
//! turns a tag body into codec configuration or an encoded frame.
//!
//! File header and tag layout:
//! ```text
//! "FLV" | version(1) | flags(1) | header size(4) | prev tag size(4)=0
//! +--------+-------------+-----------+-------------+---------+-----------------+
//! | Type(1)| DataSize(3) | TS(3+1)   | StreamID(3) | Data(N) | PrevTagSize(4)  |
//! +--------+-------------+-----------+-------------+---------+-----------------+
//! ```
//!
//! Video tag body:
//! ```text
//! +----------+----------+
//! | FrameType| CodecID  | CodecData...
//! | (4 bits) | (4 bits) |
//! +----------+----------+
//! ```
//!
//! Audio tag body:
//! ```text
//! +-----------+----------+----------+----------+
//! |SoundFormat|SoundRate |SoundSize |SoundType | AudioData...
//! | (4 bits)  | (2 bits) | (1 bit)  | (1 bit)  |
//! +-----------+----------+----------+----------+
//! ```

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{MediaError, Result};
use crate::media::aac::AacData;
use crate::media::codec::CodecFamily;
use crate::media::h264::{read_si24, AvcConfig, H264Data};
use crate::media::h265::HevcConfig;

/// FLV file signature
pub const FLV_SIGNATURE: [u8; 3] = *b"FLV";

const TAG_HEADER_SIZE: usize = 11;

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio,
    Video,
    Script,
}

impl FlvTagType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            8 => Some(FlvTagType::Audio),
            9 => Some(FlvTagType::Video),
            18 => Some(FlvTagType::Script),
            _ => None,
        }
    }
}

/// FLV file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlvHeader {
    pub version: u8,
    pub has_audio: bool,
    pub has_video: bool,
}

/// Parsed FLV tag
#[derive(Debug, Clone)]
pub struct FlvTag {
    /// Tag type
    pub tag_type: FlvTagType,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Raw tag data (including codec headers)
    pub data: Bytes,
}

/// Video frame type (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    Keyframe = 1,
    InterFrame = 2,
    DisposableInterFrame = 3,
    GeneratedKeyframe = 4,
    VideoInfoFrame = 5,
}

impl VideoFrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::VideoInfoFrame),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(
            self,
            VideoFrameType::Keyframe | VideoFrameType::GeneratedKeyframe
        )
    }
}

/// Video codec ID (lower 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    SorensonH263 = 2,
    ScreenVideo = 3,
    Vp6 = 4,
    Vp6Alpha = 5,
    ScreenVideoV2 = 6,
    /// AVC (H.264)
    Avc = 7,
    /// HEVC (H.265), the de facto extension used by most encoders
    Hevc = 12,
}

impl VideoCodec {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x0F {
            2 => Some(VideoCodec::SorensonH263),
            3 => Some(VideoCodec::ScreenVideo),
            4 => Some(VideoCodec::Vp6),
            5 => Some(VideoCodec::Vp6Alpha),
            6 => Some(VideoCodec::ScreenVideoV2),
            7 => Some(VideoCodec::Avc),
            12 => Some(VideoCodec::Hevc),
            _ => None,
        }
    }
}

/// Audio format (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    LinearPcmPlatform = 0,
    Adpcm = 1,
    Mp3 = 2,
    LinearPcmLe = 3,
    Nellymoser16kMono = 4,
    Nellymoser8kMono = 5,
    Nellymoser = 6,
    /// G.711 A-law
    G711ALaw = 7,
    /// G.711 mu-law
    G711MuLaw = 8,
    Aac = 10,
    Speex = 11,
    Mp38k = 14,
    DeviceSpecific = 15,
}

impl AudioFormat {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            0 => Some(AudioFormat::LinearPcmPlatform),
            1 => Some(AudioFormat::Adpcm),
            2 => Some(AudioFormat::Mp3),
            3 => Some(AudioFormat::LinearPcmLe),
            4 => Some(AudioFormat::Nellymoser16kMono),
            5 => Some(AudioFormat::Nellymoser8kMono),
            6 => Some(AudioFormat::Nellymoser),
            7 => Some(AudioFormat::G711ALaw),
            8 => Some(AudioFormat::G711MuLaw),
            10 => Some(AudioFormat::Aac),
            11 => Some(AudioFormat::Speex),
            14 => Some(AudioFormat::Mp38k),
            15 => Some(AudioFormat::DeviceSpecific),
            _ => None,
        }
    }

    /// Codec family carried through the relay, if any
    pub fn family(&self) -> Option<CodecFamily> {
        match self {
            AudioFormat::Aac => Some(CodecFamily::Aac),
            AudioFormat::G711ALaw => Some(CodecFamily::PcmAlaw),
            AudioFormat::G711MuLaw => Some(CodecFamily::PcmMulaw),
            AudioFormat::Mp3 | AudioFormat::Mp38k => Some(CodecFamily::Mp3),
            _ => None,
        }
    }
}

/// What a tag body means to the relay
#[derive(Debug, Clone)]
pub enum TagPayload {
    /// Decoder configuration for the video track
    VideoConfig { family: CodecFamily, config: Bytes },
    /// Decoder configuration for the audio track
    AudioConfig { family: CodecFamily, config: Bytes },
    /// One encoded video frame (length-prefixed NAL units)
    Video {
        family: CodecFamily,
        keyframe: bool,
        composition_time: i32,
        data: Bytes,
    },
    /// One encoded audio frame
    Audio { family: CodecFamily, data: Bytes },
    /// Metadata, end-of-sequence markers and the like
    Skip,
}

impl FlvTag {
    /// Create a new video tag
    pub fn video(timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type: FlvTagType::Video,
            timestamp,
            data,
        }
    }

    /// Create a new audio tag
    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type: FlvTagType::Audio,
            timestamp,
            data,
        }
    }

    pub fn is_video(&self) -> bool {
        self.tag_type == FlvTagType::Video
    }

    pub fn is_audio(&self) -> bool {
        self.tag_type == FlvTagType::Audio
    }

    /// For video tags, get the frame type
    pub fn video_frame_type(&self) -> Option<VideoFrameType> {
        if self.is_video() && !self.data.is_empty() {
            VideoFrameType::from_byte(self.data[0])
        } else {
            None
        }
    }

    /// For video tags, get the codec
    pub fn video_codec(&self) -> Option<VideoCodec> {
        if self.is_video() && !self.data.is_empty() {
            VideoCodec::from_byte(self.data[0])
        } else {
            None
        }
    }

    /// For audio tags, get the format
    pub fn audio_format(&self) -> Option<AudioFormat> {
        if self.is_audio() && !self.data.is_empty() {
            AudioFormat::from_byte(self.data[0])
        } else {
            None
        }
    }

    /// Check if this is a keyframe
    pub fn is_keyframe(&self) -> bool {
        self.video_frame_type()
            .map(|ft| ft.is_keyframe())
            .unwrap_or(false)
    }

    /// Interpret the tag body
    pub fn payload(&self) -> std::result::Result<TagPayload, MediaError> {
        match self.tag_type {
            FlvTagType::Script => Ok(TagPayload::Skip),
            FlvTagType::Video => self.video_payload(),
            FlvTagType::Audio => self.audio_payload(),
        }
    }

    fn video_payload(&self) -> std::result::Result<TagPayload, MediaError> {
        if self.data.is_empty() {
            return Err(MediaError::InvalidFlvTag);
        }
        if self.video_frame_type() == Some(VideoFrameType::VideoInfoFrame) {
            return Ok(TagPayload::Skip);
        }
        let flagged_keyframe = self.is_keyframe();

        match self.video_codec() {
            Some(VideoCodec::Avc) => match H264Data::parse(self.data.slice(1..))? {
                H264Data::SequenceHeader(config) => Ok(TagPayload::VideoConfig {
                    family: CodecFamily::H264,
                    config: config.raw,
                }),
                H264Data::Frame {
                    keyframe,
                    composition_time,
                    nalus,
                } => Ok(TagPayload::Video {
                    family: CodecFamily::H264,
                    keyframe: keyframe || flagged_keyframe,
                    composition_time,
                    data: nalus,
                }),
                H264Data::EndOfSequence => Ok(TagPayload::Skip),
            },
            Some(VideoCodec::Hevc) => {
                if self.data.len() < 5 {
                    return Err(MediaError::InvalidHevcPacket);
                }
                let packet_type = self.data[1];
                let mut cts = self.data.slice(2..5);
                let composition_time = read_si24(&mut cts);
                let body = self.data.slice(5..);
                match packet_type {
                    0 => Ok(TagPayload::VideoConfig {
                        family: CodecFamily::H265,
                        config: HevcConfig::parse(body)?.raw,
                    }),
                    1 => Ok(TagPayload::Video {
                        family: CodecFamily::H265,
                        keyframe: flagged_keyframe,
                        composition_time,
                        data: body,
                    }),
                    _ => Ok(TagPayload::Skip),
                }
            }
            other => Err(MediaError::UnsupportedCodec(format!("video {:?}", other))),
        }
    }

    fn audio_payload(&self) -> std::result::Result<TagPayload, MediaError> {
        let format = self.audio_format().ok_or(MediaError::InvalidFlvTag)?;
        let family = format
            .family()
            .ok_or_else(|| MediaError::UnsupportedCodec(format!("audio {:?}", format)))?;

        match format {
            AudioFormat::Aac => match AacData::parse(self.data.slice(1..))? {
                AacData::SequenceHeader(config) => Ok(TagPayload::AudioConfig {
                    family,
                    config: config.raw,
                }),
                AacData::Frame(data) => Ok(TagPayload::Audio { family, data }),
            },
            _ => Ok(TagPayload::Audio {
                family,
                data: self.data.slice(1..),
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Whether a video decoder configuration record parses
pub fn validate_video_config(family: CodecFamily, config: &Bytes) -> bool {
    match family {
        CodecFamily::H264 => AvcConfig::parse(config.clone()).is_ok(),
        CodecFamily::H265 => HevcConfig::parse(config.clone()).is_ok(),
        _ => false,
    }
}

/// Streaming FLV reader
pub struct FlvReader<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin> FlvReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read and validate the file header
    pub async fn read_header(&mut self) -> Result<FlvHeader> {
        let mut buf = [0u8; 9];
        self.reader.read_exact(&mut buf).await?;
        if buf[..3] != FLV_SIGNATURE {
            return Err(MediaError::InvalidFlvHeader.into());
        }

        let data_offset = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) as usize;
        if data_offset < 9 {
            return Err(MediaError::InvalidFlvHeader.into());
        }
        // Header extension plus the zero previous-tag-size
        let skip = (data_offset - 9 + 4) as u64;
        let mut extension = (&mut self.reader).take(skip);
        let skipped = tokio::io::copy(&mut extension, &mut tokio::io::sink()).await?;
        if skipped < skip {
            return Err(MediaError::InvalidFlvHeader.into());
        }

        Ok(FlvHeader {
            version: buf[3],
            has_audio: buf[4] & 0x04 != 0,
            has_video: buf[4] & 0x01 != 0,
        })
    }

    /// Read the next tag. Returns `None` at a clean end of stream.
    pub async fn next_tag(&mut self) -> Result<Option<FlvTag>> {
        let mut header = [0u8; TAG_HEADER_SIZE];
        match self.reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let tag_type = FlvTagType::from_byte(header[0]).ok_or(MediaError::InvalidFlvTag)?;
        let size = u32::from_be_bytes([0, header[1], header[2], header[3]]) as usize;
        let timestamp = u32::from_be_bytes([header[7], header[4], header[5], header[6]]);

        let mut data = vec![0u8; size];
        self.reader.read_exact(&mut data).await?;
        let mut prev = [0u8; 4];
        self.reader.read_exact(&mut prev).await?;

        Ok(Some(FlvTag {
            tag_type,
            timestamp,
            data: Bytes::from(data),
        }))
    }
}

#[cfg(test)]
impl FlvHeader {
    /// Encode the header followed by the zero "previous tag size"
    pub(crate) fn encode(&self) -> Bytes {
        use bytes::{BufMut, BytesMut};

        let mut buf = BytesMut::with_capacity(13);
        buf.put_slice(&FLV_SIGNATURE);
        buf.put_u8(self.version);
        let mut flags = 0;
        if self.has_audio {
            flags |= 0x04;
        }
        if self.has_video {
            flags |= 0x01;
        }
        buf.put_u8(flags);
        buf.put_u32(9);
        buf.put_u32(0);
        buf.freeze()
    }
}

#[cfg(test)]
impl FlvTag {
    /// Encode as a complete tag including the trailing previous-tag-size
    pub(crate) fn encode(&self) -> Bytes {
        use bytes::{BufMut, BytesMut};

        let tag_type = match self.tag_type {
            FlvTagType::Audio => 8,
            FlvTagType::Video => 9,
            FlvTagType::Script => 18,
        };
        let size = self.data.len();
        let mut buf = BytesMut::with_capacity(TAG_HEADER_SIZE + size + 4);
        buf.put_u8(tag_type);
        buf.put_uint(size as u64, 3);
        buf.put_uint((self.timestamp & 0x00FF_FFFF) as u64, 3);
        buf.put_u8((self.timestamp >> 24) as u8);
        buf.put_uint(0, 3);
        buf.put_slice(&self.data);
        buf.put_u32((TAG_HEADER_SIZE + size) as u32);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    use super::*;

    const AVC_SEQUENCE_HEADER: &[u8] = &[
        0x17, 0x00, 0x00, 0x00, 0x00, // keyframe, AVC, seq header, cts 0
        0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x64, 0x00, 0x1F, 0x01, 0x00, 0x03,
        0x68, 0xEF, 0x38,
    ];

    #[test]
    fn test_video_frame_type() {
        assert_eq!(
            VideoFrameType::from_byte(0x17),
            Some(VideoFrameType::Keyframe)
        );
        assert_eq!(VideoCodec::from_byte(0x17), Some(VideoCodec::Avc));
        assert_eq!(
            VideoFrameType::from_byte(0x27),
            Some(VideoFrameType::InterFrame)
        );
        assert_eq!(VideoFrameType::from_byte(0x00), None);
        assert!(VideoFrameType::GeneratedKeyframe.is_keyframe());
        assert!(!VideoFrameType::DisposableInterFrame.is_keyframe());
    }

    #[test]
    fn test_audio_format_family() {
        assert_eq!(
            AudioFormat::from_byte(0xAF).and_then(|f| f.family()),
            Some(CodecFamily::Aac)
        );
        assert_eq!(
            AudioFormat::from_byte(0x70).and_then(|f| f.family()),
            Some(CodecFamily::PcmAlaw)
        );
        assert_eq!(
            AudioFormat::from_byte(0x80).and_then(|f| f.family()),
            Some(CodecFamily::PcmMulaw)
        );
        assert_eq!(AudioFormat::from_byte(0xB0).and_then(|f| f.family()), None);
        assert_eq!(AudioFormat::from_byte(0x90), None);
    }

    #[test]
    fn test_payload_avc_sequence_header() {
        let tag = FlvTag::video(0, Bytes::from_static(AVC_SEQUENCE_HEADER));
        match tag.payload().unwrap() {
            TagPayload::VideoConfig { family, config } => {
                assert_eq!(family, CodecFamily::H264);
                assert_eq!(&config[..], &AVC_SEQUENCE_HEADER[5..]);
                assert!(validate_video_config(family, &config));
            }
            other => panic!("Expected VideoConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_payload_avc_frame() {
        let tag = FlvTag::video(
            40,
            Bytes::from_static(&[
                0x27, 0x01, 0x00, 0x00, 0x21, // inter frame, NALU, cts 33
                0x00, 0x00, 0x00, 0x02, 0x41, 0x9A,
            ]),
        );
        match tag.payload().unwrap() {
            TagPayload::Video {
                keyframe,
                composition_time,
                data,
                ..
            } => {
                assert!(!keyframe);
                assert_eq!(composition_time, 33);
                assert_eq!(&data[..], &[0x00, 0x00, 0x00, 0x02, 0x41, 0x9A]);
            }
            other => panic!("Expected Video, got {:?}", other),
        }
    }

    #[test]
    fn test_payload_aac() {
        let header = FlvTag::audio(0, Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10]));
        assert!(matches!(
            header.payload().unwrap(),
            TagPayload::AudioConfig {
                family: CodecFamily::Aac,
                ..
            }
        ));

        let frame = FlvTag::audio(23, Bytes::from_static(&[0xAF, 0x01, 0x21, 0x00]));
        match frame.payload().unwrap() {
            TagPayload::Audio { family, data } => {
                assert_eq!(family, CodecFamily::Aac);
                assert_eq!(&data[..], &[0x21, 0x00]);
            }
            other => panic!("Expected Audio, got {:?}", other),
        }
    }

    #[test]
    fn test_payload_g711() {
        let tag = FlvTag::audio(0, Bytes::from_static(&[0x72, 0xD5, 0xD5, 0xD5]));
        match tag.payload().unwrap() {
            TagPayload::Audio { family, data } => {
                assert_eq!(family, CodecFamily::PcmAlaw);
                assert_eq!(data.len(), 3);
            }
            other => panic!("Expected Audio, got {:?}", other),
        }
    }

    #[test]
    fn test_payload_unsupported() {
        let vp6 = FlvTag::video(0, Bytes::from_static(&[0x14, 0x00]));
        assert!(matches!(
            vp6.payload(),
            Err(MediaError::UnsupportedCodec(_))
        ));

        let speex = FlvTag::audio(0, Bytes::from_static(&[0xB2, 0x00]));
        assert!(matches!(
            speex.payload(),
            Err(MediaError::UnsupportedCodec(_))
        ));

        assert!(FlvTag::video(0, Bytes::new()).payload().is_err());
    }

    #[tokio::test]
    async fn test_reader_reads_tags() {
        let mut stream = BytesMut::new();
        stream.put_slice(
            &FlvHeader {
                version: 1,
                has_audio: true,
                has_video: true,
            }
            .encode(),
        );
        stream.put_slice(&FlvTag::video(0, Bytes::from_static(AVC_SEQUENCE_HEADER)).encode());
        stream.put_slice(
            &FlvTag::audio(0x0100_0010, Bytes::from_static(&[0xAF, 0x01, 0x21])).encode(),
        );

        let mut reader = FlvReader::new(&stream[..]);
        let header = reader.read_header().await.unwrap();
        assert!(header.has_audio && header.has_video);

        let first = reader.next_tag().await.unwrap().unwrap();
        assert!(first.is_video());
        assert_eq!(&first.data[..], AVC_SEQUENCE_HEADER);

        let second = reader.next_tag().await.unwrap().unwrap();
        assert!(second.is_audio());
        assert_eq!(second.timestamp, 0x0100_0010);

        assert!(reader.next_tag().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_rejects_bad_signature() {
        let data = b"FLX\x01\x05\x00\x00\x00\x09\x00\x00\x00\x00";
        let mut reader = FlvReader::new(&data[..]);
        assert!(reader.read_header().await.is_err());
    }

    #[tokio::test]
    async fn test_reader_skips_header_extension() {
        // Header size 13: four extension bytes before the previous-tag-size
        let mut stream = BytesMut::new();
        stream.put_slice(b"FLV\x01\x01");
        stream.put_u32(13);
        stream.put_slice(&[0xAA; 4]);
        stream.put_u32(0);
        stream.put_slice(&FlvTag::video(7, Bytes::from_static(AVC_SEQUENCE_HEADER)).encode());

        let mut reader = FlvReader::new(&stream[..]);
        let header = reader.read_header().await.unwrap();
        assert!(header.has_video && !header.has_audio);
        assert_eq!(reader.next_tag().await.unwrap().unwrap().timestamp, 7);
    }

    #[tokio::test]
    async fn test_reader_rejects_oversized_header_offset() {
        let data = b"FLV\x01\x05\xFF\xFF\xFF\xFF\x00\x00\x00\x00";
        let mut reader = FlvReader::new(&data[..]);
        assert!(matches!(
            reader.read_header().await,
            Err(crate::error::Error::Media(MediaError::InvalidFlvHeader))
        ));
    }
}
