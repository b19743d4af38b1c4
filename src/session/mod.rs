//! Viewer sessions
//!
//! A session relays one stream to one client over one transport. The
//! transport-specific part is a [`ProtocolSink`]; everything else (keyframe
//! gating, the liveness deadline, track filtering, cleanup) lives in
//! [`SessionController`] and is shared by every transport.

pub mod controller;
pub mod gate;
pub mod negotiate;
pub mod sink;

pub use controller::{SessionController, SessionOutcome, LIVENESS_WINDOW};
pub use gate::{GateState, KeyframeGate, Verdict};
pub use negotiate::{negotiate, peer_track_kinds, Negotiated, TrackKind, Transport};
pub use sink::{CloseReason, ProtocolSink};
