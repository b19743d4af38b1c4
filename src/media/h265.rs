//! H.265/HEVC decoder configuration
//!
//! Only what the MP4 sample entry needs: the NALU length size and the fields
//! that make up the `hvc1` codecs string. The record itself is copied into the
//! `hvcC` box untouched.
//!
//! HEVCDecoderConfigurationRecord (first 23 bytes):
//! ```text
//! version (1) | profile_space(2) tier(1) profile_idc(5) | compat flags (4)
//! | constraint flags (6) | level_idc (1) | ... | lengthSizeMinusOne (byte 21, low 2 bits)
//! ```

use bytes::Bytes;

use crate::error::MediaError;

/// Parsed HEVC decoder configuration
#[derive(Debug, Clone)]
pub struct HevcConfig {
    pub profile_space: u8,
    pub tier_flag: bool,
    pub profile_idc: u8,
    pub compatibility_flags: u32,
    pub constraint_flags: [u8; 6],
    pub level_idc: u8,
    pub nalu_length_size: u8,
    pub raw: Bytes,
}

impl HevcConfig {
    pub fn parse(data: Bytes) -> Result<Self, MediaError> {
        if data.len() < 23 || data[0] != 1 {
            return Err(MediaError::InvalidHevcPacket);
        }

        let mut constraint_flags = [0u8; 6];
        constraint_flags.copy_from_slice(&data[6..12]);

        Ok(HevcConfig {
            profile_space: data[1] >> 6,
            tier_flag: data[1] & 0x20 != 0,
            profile_idc: data[1] & 0x1F,
            compatibility_flags: u32::from_be_bytes([data[2], data[3], data[4], data[5]]),
            constraint_flags,
            level_idc: data[12],
            nalu_length_size: (data[21] & 0x03) + 1,
            raw: data,
        })
    }

    /// RFC 6381 codecs string, e.g. `hvc1.1.6.L93.B0`
    pub fn codec_string(&self) -> String {
        let space = match self.profile_space {
            1 => "A",
            2 => "B",
            3 => "C",
            _ => "",
        };
        let tier = if self.tier_flag { 'H' } else { 'L' };

        let mut out = format!(
            "hvc1.{}{}.{:X}.{}{}",
            space,
            self.profile_idc,
            self.compatibility_flags.reverse_bits(),
            tier,
            self.level_idc
        );

        let used = self
            .constraint_flags
            .iter()
            .rposition(|b| *b != 0)
            .map_or(0, |i| i + 1);
        for b in &self.constraint_flags[..used] {
            out.push_str(&format!(".{:X}", b));
        }
        out
    }
}
