//! Protocol sinks
//!
//! - `webrtc`: peer-connection delivery through `webrtc-rs`
//! - `chunk`: fragmented MP4 frames over the signaling channel
//! - `fmp4`: the ISO BMFF muxer behind `chunk`

pub mod chunk;
pub mod fmp4;
pub mod webrtc;

pub use self::chunk::ChunkSink;
pub use self::fmp4::FragmentedMuxer;
pub use self::webrtc::{PeerOptions, PeerSink};
