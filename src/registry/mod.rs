//! Stream registry and broadcast hub
//!
//! The registry maps stream ids to their live state and starts ingestion
//! workers on demand. The hub fans packets out from a worker to per-viewer
//! queues.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<StreamRegistry>
//!                   ┌───────────────────────────┐
//!                   │ streams: HashMap<id,      │
//!                   │   StreamEntry {           │
//!                   │     running, activation,  │
//!                   │     codecs: watch,        │
//!                   │   }>                      │
//!                   │ hub: Arc<BroadcastHub>    │
//!                   └─────────────┬─────────────┘
//!                                 │
//!     ensure_running()            │              attach()
//!  ┌──────────────────────────────┼───────────────────────────┐
//!  ▼                              ▼                           ▼
//! [Ingest worker] ── publish() ─► [queue] ──► Subscription ──► SessionController
//!                                 [queue] ──► Subscription ──► SessionController
//! ```
//!
//! # Zero-Copy Design
//!
//! `bytes::Bytes` uses reference counting, so every subscriber queue shares
//! the same payload allocation.

pub mod config;
pub mod entry;
pub mod hub;
pub mod store;

pub use config::{IceConfig, RegistryConfig};
pub use entry::{CodecSet, StreamConfig, StreamEntry, StreamInfo};
pub use hub::{BroadcastHub, Subscription, SubscriptionId};
pub use store::StreamRegistry;
