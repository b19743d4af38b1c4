//! H.264/AVC parsing
//!
//! FLV carries H.264 in AVCC format (length-prefixed NAL units). Browsers need
//! two other views of the same data: WebRTC packetizers take Annex-B (start
//! code delimited) access units, and the MP4 sample entry needs the picture
//! dimensions and an RFC 6381 codecs string.
//!
//! AVC Video Packet Structure (FLV video tag body):
//! ```text
//! +----------+----------+-----------------+
//! |FrameType | CodecID  | AVCPacketType   | CompositionTime | Data
//! | (4 bits) | (4 bits) | (1 byte)        | (3 bytes, SI24) |
//! +----------+----------+-----------------+
//! ```
//!
//! AVCDecoderConfigurationRecord (sequence header):
//! ```text
//! configurationVersion (1) | AVCProfileIndication (1) | profile_compatibility (1)
//! | AVCLevelIndication (1) | lengthSizeMinusOne (1, lower 2 bits)
//! | numOfSPS (1, lower 5 bits) | { spsLength (2) | spsNALUnit }*
//! | numOfPPS (1) | { ppsLength (2) | ppsNALUnit }*
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::MediaError;

type Result<T> = std::result::Result<T, MediaError>;

/// Annex-B start code
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// AVC packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    /// Sequence header (AVCDecoderConfigurationRecord)
    SequenceHeader = 0,
    /// NAL units
    Nalu = 1,
    /// End of sequence
    EndOfSequence = 2,
}

impl AvcPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AvcPacketType::SequenceHeader),
            1 => Some(AvcPacketType::Nalu),
            2 => Some(AvcPacketType::EndOfSequence),
            _ => None,
        }
    }
}

/// NAL unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice
    Slice = 1,
    /// IDR slice (keyframe)
    Idr = 5,
    /// Supplemental enhancement information
    Sei = 6,
    /// Sequence parameter set
    Sps = 7,
    /// Picture parameter set
    Pps = 8,
    /// Access unit delimiter
    Aud = 9,
}

impl NaluType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            1 => Some(NaluType::Slice),
            5 => Some(NaluType::Idr),
            6 => Some(NaluType::Sei),
            7 => Some(NaluType::Sps),
            8 => Some(NaluType::Pps),
            9 => Some(NaluType::Aud),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, NaluType::Idr)
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NaluType::Sps | NaluType::Pps)
    }
}

/// AVC decoder configuration (from sequence header)
#[derive(Debug, Clone)]
pub struct AvcConfig {
    /// AVC profile (66=Baseline, 77=Main, 100=High, etc.)
    pub profile: u8,
    /// Profile compatibility flags
    pub compatibility: u8,
    /// AVC level (e.g., 31 = 3.1)
    pub level: u8,
    /// NALU length size in bytes (usually 4)
    pub nalu_length_size: u8,
    /// Sequence Parameter Sets
    pub sps: Vec<Bytes>,
    /// Picture Parameter Sets
    pub pps: Vec<Bytes>,
    /// Raw AVCDecoderConfigurationRecord bytes
    pub raw: Bytes,
}

impl AvcConfig {
    /// Parse from AVCDecoderConfigurationRecord
    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() < 7 {
            return Err(MediaError::InvalidAvcPacket);
        }

        let raw = data.clone();
        let mut data = data;

        let version = data.get_u8();
        if version != 1 {
            return Err(MediaError::InvalidAvcPacket);
        }

        let profile = data.get_u8();
        let compatibility = data.get_u8();
        let level = data.get_u8();
        let nalu_length_size = (data.get_u8() & 0x03) + 1;

        let num_sps = (data.get_u8() & 0x1F) as usize;
        let sps = read_parameter_sets(&mut data, num_sps)?;

        if data.is_empty() {
            return Err(MediaError::InvalidAvcPacket);
        }
        let num_pps = data.get_u8() as usize;
        let pps = read_parameter_sets(&mut data, num_pps)?;

        Ok(AvcConfig {
            profile,
            compatibility,
            level,
            nalu_length_size,
            sps,
            pps,
            raw,
        })
    }

    /// RFC 6381 codecs string, e.g. `avc1.64001f`
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02x}{:02x}{:02x}",
            self.profile, self.compatibility, self.level
        )
    }

    /// Picture dimensions from the first SPS, if it parses
    pub fn dimensions(&self) -> Option<(u16, u16)> {
        let sps = self.sps.first()?;
        SpsInfo::parse(sps)
            .ok()
            .map(|info| (info.width as u16, info.height as u16))
    }

    /// SPS and PPS in Annex-B form, prepended to keyframes for WebRTC
    pub fn parameter_sets_annexb(&self) -> Bytes {
        let mut out = BytesMut::new();
        for nalu in self.sps.iter().chain(self.pps.iter()) {
            out.put_slice(&START_CODE);
            out.put_slice(nalu);
        }
        out.freeze()
    }
}

fn read_parameter_sets(data: &mut Bytes, count: usize) -> Result<Vec<Bytes>> {
    let mut sets = Vec::with_capacity(count);
    for _ in 0..count {
        if data.len() < 2 {
            return Err(MediaError::InvalidAvcPacket);
        }
        let len = data.get_u16() as usize;
        if data.len() < len {
            return Err(MediaError::InvalidAvcPacket);
        }
        sets.push(data.copy_to_bytes(len));
    }
    Ok(sets)
}

/// Parsed FLV AVC video tag body (after the frame type/codec byte)
#[derive(Debug, Clone)]
pub enum H264Data {
    /// Sequence header with SPS/PPS
    SequenceHeader(AvcConfig),

    /// Video frame (one or more NAL units)
    Frame {
        /// Whether this is a keyframe (IDR)
        keyframe: bool,
        /// Composition time offset in milliseconds
        composition_time: i32,
        /// NAL units in AVCC format (length-prefixed)
        nalus: Bytes,
    },

    /// End of sequence marker
    EndOfSequence,
}

impl H264Data {
    /// Parse from FLV video data (after frame type and codec ID byte)
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.len() < 4 {
            return Err(MediaError::InvalidAvcPacket);
        }

        let packet_type = data.get_u8();
        let composition_time = read_si24(&mut data);

        match AvcPacketType::from_byte(packet_type) {
            Some(AvcPacketType::SequenceHeader) => {
                let config = AvcConfig::parse(data)?;
                Ok(H264Data::SequenceHeader(config))
            }
            Some(AvcPacketType::Nalu) => {
                let keyframe = contains_idr(&data);
                Ok(H264Data::Frame {
                    keyframe,
                    composition_time,
                    nalus: data,
                })
            }
            Some(AvcPacketType::EndOfSequence) => Ok(H264Data::EndOfSequence),
            None => Err(MediaError::InvalidAvcPacket),
        }
    }
}

/// Read a signed 24-bit big-endian integer
pub(crate) fn read_si24(data: &mut Bytes) -> i32 {
    let ct0 = data.get_u8() as i32;
    let ct1 = data.get_u8() as i32;
    let ct2 = data.get_u8() as i32;
    let value = (ct0 << 16) | (ct1 << 8) | ct2;
    if value & 0x800000 != 0 {
        value | !0xFFFFFF
    } else {
        value
    }
}

/// Check if 4-byte length-prefixed NAL units contain an IDR slice
fn contains_idr(data: &[u8]) -> bool {
    NaluIterator::new(data, 4)
        .filter_map(|nalu| nalu.first().copied())
        .any(|b| NaluType::from_byte(b) == Some(NaluType::Idr))
}

/// Convert AVCC (length-prefixed) NAL units to Annex-B
pub fn avcc_to_annexb(data: &[u8], nalu_length_size: u8) -> Bytes {
    let mut out = BytesMut::with_capacity(data.len() + 16);
    for nalu in NaluIterator::new(data, nalu_length_size) {
        out.put_slice(&START_CODE);
        out.put_slice(nalu);
    }
    out.freeze()
}

/// Iterator over NAL units in AVCC format
pub struct NaluIterator<'a> {
    data: &'a [u8],
    offset: usize,
    nalu_length_size: usize,
}

impl<'a> NaluIterator<'a> {
    pub fn new(data: &'a [u8], nalu_length_size: u8) -> Self {
        Self {
            data,
            offset: 0,
            nalu_length_size: nalu_length_size as usize,
        }
    }
}

impl<'a> Iterator for NaluIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.nalu_length_size == 0 || self.offset + self.nalu_length_size > self.data.len() {
            return None;
        }

        let mut len: usize = 0;
        for i in 0..self.nalu_length_size {
            len = (len << 8) | (self.data[self.offset + i] as usize);
        }
        self.offset += self.nalu_length_size;

        if self.offset + len > self.data.len() {
            return None;
        }

        let nalu = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Some(nalu)
    }
}

/// Fields of a sequence parameter set needed for the MP4 sample entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpsInfo {
    pub profile_idc: u8,
    pub level_idc: u8,
    pub width: u32,
    pub height: u32,
}

impl SpsInfo {
    /// Parse an SPS NAL unit (including its one-byte NAL header)
    pub fn parse(nalu: &[u8]) -> Result<Self> {
        if nalu.len() < 4 {
            return Err(MediaError::InvalidSps);
        }
        let rbsp = unescape_rbsp(&nalu[1..]);
        let mut r = BitReader::new(&rbsp);

        let profile_idc = r.read_bits(8)? as u8;
        r.read_bits(8)?; // constraint flags
        let level_idc = r.read_bits(8)? as u8;
        r.read_ue()?; // seq_parameter_set_id

        let mut chroma_format_idc = 1;
        if matches!(
            profile_idc,
            100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
        ) {
            chroma_format_idc = r.read_ue()?;
            if chroma_format_idc == 3 {
                r.read_bit()?; // separate_colour_plane_flag
            }
            r.read_ue()?; // bit_depth_luma_minus8
            r.read_ue()?; // bit_depth_chroma_minus8
            r.read_bit()?; // qpprime_y_zero_transform_bypass_flag
            if r.read_bit()? == 1 {
                let lists = if chroma_format_idc == 3 { 12 } else { 8 };
                for i in 0..lists {
                    if r.read_bit()? == 1 {
                        skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
        }

        r.read_ue()?; // log2_max_frame_num_minus4
        match r.read_ue()? {
            0 => {
                r.read_ue()?; // log2_max_pic_order_cnt_lsb_minus4
            }
            1 => {
                r.read_bit()?; // delta_pic_order_always_zero_flag
                r.read_se()?; // offset_for_non_ref_pic
                r.read_se()?; // offset_for_top_to_bottom_field
                let cycle = r.read_ue()?;
                for _ in 0..cycle {
                    r.read_se()?;
                }
            }
            _ => {}
        }
        r.read_ue()?; // max_num_ref_frames
        r.read_bit()?; // gaps_in_frame_num_value_allowed_flag

        let width_mbs = r.read_ue()? + 1;
        let height_map_units = r.read_ue()? + 1;
        let frame_mbs_only = r.read_bit()?;
        if frame_mbs_only == 0 {
            r.read_bit()?; // mb_adaptive_frame_field_flag
        }
        r.read_bit()?; // direct_8x8_inference_flag

        let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
        if r.read_bit()? == 1 {
            crop_left = r.read_ue()?;
            crop_right = r.read_ue()?;
            crop_top = r.read_ue()?;
            crop_bottom = r.read_ue()?;
        }

        let (crop_unit_x, crop_unit_y) = match chroma_format_idc {
            0 => (1, 2 - frame_mbs_only),
            1 => (2, 2 * (2 - frame_mbs_only)),
            2 => (2, 2 - frame_mbs_only),
            _ => (1, 2 - frame_mbs_only),
        };

        let width = (width_mbs * 16).saturating_sub((crop_left + crop_right) * crop_unit_x);
        let height = ((2 - frame_mbs_only) * height_map_units * 16)
            .saturating_sub((crop_top + crop_bottom) * crop_unit_y);

        Ok(SpsInfo {
            profile_idc,
            level_idc,
            width,
            height,
        })
    }
}

fn skip_scaling_list(r: &mut BitReader<'_>, size: usize) -> Result<()> {
    let mut last = 8i32;
    let mut next = 8i32;
    for _ in 0..size {
        if next != 0 {
            let delta = r.read_se()?;
            next = (last + delta + 256) % 256;
        }
        if next != 0 {
            last = next;
        }
    }
    Ok(())
}

/// Strip emulation prevention bytes (`00 00 03`)
fn unescape_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &b in data {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        out.push(b);
        if b == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
    }
    out
}

/// MSB-first bit reader with Exp-Golomb support
struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bit(&mut self) -> Result<u32> {
        let byte = *self.data.get(self.pos / 8).ok_or(MediaError::InvalidSps)?;
        let bit = (byte >> (7 - (self.pos % 8))) & 0x01;
        self.pos += 1;
        Ok(bit as u32)
    }

    fn read_bits(&mut self, n: u32) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()?;
        }
        Ok(value)
    }

    fn read_ue(&mut self) -> Result<u32> {
        let mut zeros = 0;
        while self.read_bit()? == 0 {
            zeros += 1;
            if zeros > 31 {
                return Err(MediaError::InvalidSps);
            }
        }
        if zeros == 0 {
            return Ok(0);
        }
        Ok((1u32 << zeros) - 1 + self.read_bits(zeros)?)
    }

    fn read_se(&mut self) -> Result<i32> {
        let k = self.read_ue()?;
        if k & 1 == 1 {
            Ok(k.div_ceil(2) as i32)
        } else {
            Ok(-((k / 2) as i32))
        }
    }
}
