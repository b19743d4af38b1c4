//! AAC audio parsing
//!
//! FLV carries AAC as raw access units (no ADTS headers) behind a one-byte
//! packet type. The sequence header holds the AudioSpecificConfig, which the
//! fragmented MP4 muxer copies into the `esds` box verbatim.
//!
//! ```text
//! +-----------+----------+----------+----------+---------+
//! |SoundFormat|SoundRate |SoundSize |SoundType | AACType | AACData
//! | (4 bits)  | (2 bits) | (1 bit)  | (1 bit)  | (1 byte)|
//! +-----------+----------+----------+----------+---------+
//! ```

use bytes::{Buf, Bytes};

use crate::error::MediaError;

type Result<T> = std::result::Result<T, MediaError>;

/// AAC packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacPacketType {
    /// Sequence header (AudioSpecificConfig)
    SequenceHeader = 0,
    /// Raw AAC frame data
    Raw = 1,
}

impl AacPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AacPacketType::SequenceHeader),
            1 => Some(AacPacketType::Raw),
            _ => None,
        }
    }
}

/// AudioSpecificConfig (from sequence header)
#[derive(Debug, Clone)]
pub struct AudioSpecificConfig {
    /// Audio object type (2 = AAC LC, 5 = HE-AAC)
    pub audio_object_type: u8,
    /// Sampling frequency index
    pub sampling_frequency_index: u8,
    /// Sampling frequency in Hz
    pub sampling_frequency: u32,
    /// Channel configuration (1=mono, 2=stereo, etc.)
    pub channel_configuration: u8,
    /// 960-sample frames instead of 1024
    pub frame_length_flag: bool,
    /// Raw config bytes
    pub raw: Bytes,
}

impl AudioSpecificConfig {
    const SAMPLING_FREQUENCIES: [u32; 13] = [
        96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
    ];

    /// Parse from AAC sequence header data
    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() < 2 {
            return Err(MediaError::InvalidAacPacket);
        }

        let b0 = data[0];
        let b1 = data[1];

        let audio_object_type = (b0 >> 3) & 0x1F;
        let sampling_frequency_index = ((b0 & 0x07) << 1) | ((b1 >> 7) & 0x01);

        let (sampling_frequency, tail) = if sampling_frequency_index == 0x0F {
            // Explicit 24-bit frequency
            if data.len() < 5 {
                return Err(MediaError::InvalidAacPacket);
            }
            let f0 = (data[1] & 0x7F) as u32;
            let f1 = data[2] as u32;
            let f2 = data[3] as u32;
            let f3 = (data[4] >> 7) as u32;
            ((f0 << 17) | (f1 << 9) | (f2 << 1) | f3, data[4] << 1)
        } else {
            let freq = Self::SAMPLING_FREQUENCIES
                .get(sampling_frequency_index as usize)
                .copied()
                .ok_or(MediaError::InvalidAacPacket)?;
            (freq, b1 << 1)
        };

        let channel_configuration = (tail >> 4) & 0x0F;
        let frame_length_flag = tail & 0x08 != 0;

        Ok(AudioSpecificConfig {
            audio_object_type,
            sampling_frequency_index,
            sampling_frequency,
            channel_configuration,
            frame_length_flag,
            raw: data,
        })
    }

    /// Channel count (0 when defined in-stream)
    pub fn channels(&self) -> u8 {
        match self.channel_configuration {
            1..=6 => self.channel_configuration,
            7 => 8,
            _ => 0,
        }
    }

    /// Samples per access unit
    pub fn samples_per_frame(&self) -> u32 {
        if self.frame_length_flag {
            960
        } else {
            1024
        }
    }

    /// RFC 6381 codecs string, e.g. `mp4a.40.2`
    pub fn codec_string(&self) -> String {
        format!("mp4a.40.{}", self.audio_object_type)
    }
}

/// Parsed FLV AAC audio tag body (after the format byte)
#[derive(Debug, Clone)]
pub enum AacData {
    /// Sequence header (AudioSpecificConfig)
    SequenceHeader(AudioSpecificConfig),

    /// Raw AAC frame (without ADTS header)
    Frame(Bytes),
}

impl AacData {
    /// Parse from FLV audio data (after format byte)
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.is_empty() {
            return Err(MediaError::InvalidAacPacket);
        }

        match AacPacketType::from_byte(data.get_u8()) {
            Some(AacPacketType::SequenceHeader) => {
                Ok(AacData::SequenceHeader(AudioSpecificConfig::parse(data)?))
            }
            Some(AacPacketType::Raw) => Ok(AacData::Frame(data)),
            None => Err(MediaError::InvalidAacPacket),
        }
    }
}
