//! live-relay: one live source, many browsers
//!
//! An ingestion worker per stream feeds a broadcast hub; every viewer gets a
//! session that gates on keyframes, enforces a liveness deadline and writes
//! to one of two transports:
//!
//! - a WebRTC peer connection (H.264, G.711, Opus)
//! - fragmented MP4 over a WebSocket for Media Source Extensions
//!   (H.264, H.265, AAC)
//!
//! ```no_run
//! use live_relay::{RelayServer, ServerConfig, StreamConfig};
//!
//! # async fn run() -> live_relay::Result<()> {
//! let server = RelayServer::new(ServerConfig::default());
//! server
//!     .add_stream("cam1", StreamConfig::new("tcp://127.0.0.1:9000").on_demand(true))
//!     .await;
//! server.run().await
//! # }
//! ```

pub mod error;
pub mod http;
pub mod ingest;
pub mod media;
pub mod registry;
pub mod server;
pub mod session;
pub mod settings;
pub mod signaling;
pub mod stats;
pub mod transport;

pub use error::{Error, MediaError, Result};
pub use ingest::{FlvIngest, Ingest, StreamFeed};
pub use media::{CodecDescriptor, CodecFamily, MediaKind, MediaPacket};
pub use registry::{BroadcastHub, RegistryConfig, StreamConfig, StreamRegistry, Subscription};
pub use server::{AppState, RelayServer, ServerConfig};
pub use session::{CloseReason, ProtocolSink, SessionController, SessionOutcome, Transport};
pub use settings::Settings;
