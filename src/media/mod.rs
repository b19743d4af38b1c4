//! Media handling
//!
//! This module provides:
//! - Codec descriptors and the packet type shared by ingestion and sessions
//! - FLV container reading
//! - H.264/AVC and H.265/HEVC configuration parsing
//! - AAC configuration parsing

pub mod aac;
pub mod codec;
pub mod flv;
pub mod h264;
pub mod h265;
pub mod packet;

pub use aac::AudioSpecificConfig;
pub use codec::{CodecDescriptor, CodecFamily, MediaKind};
pub use flv::{FlvReader, FlvTag, FlvTagType, TagPayload};
pub use h264::AvcConfig;
pub use h265::HevcConfig;
pub use packet::MediaPacket;
