//! Persistent signaling channel
//!
//! A WebSocket carrying JSON requests from the client and JSON replies plus
//! binary media frames back. One channel can start any number of sessions.

pub mod channel;
pub mod gateway;
pub mod message;

pub use channel::{ChannelWriter, Frame, Inbound};
pub use gateway::serve_channel;
pub use message::{Request, Response};
