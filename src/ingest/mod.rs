//! Ingestion workers
//!
//! A worker pulls media from a stream's source and feeds it into the relay.
//! The registry starts at most one worker per stream and hands it a
//! [`StreamFeed`], the only way a worker talks to the rest of the system.

pub mod flv;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::media::{CodecDescriptor, MediaPacket};
use crate::registry::entry::{StreamConfig, StreamEntry};
use crate::registry::hub::BroadcastHub;

pub use self::flv::FlvIngest;

/// Source of media for a stream
#[async_trait]
pub trait Ingest: Send + Sync + 'static {
    /// Pull media from `config.url` until the source ends or fails.
    ///
    /// The registry cancels the future (drops it) when an on-demand stream
    /// has been idle for too long.
    async fn run(&self, config: &StreamConfig, feed: StreamFeed) -> Result<()>;
}

/// A worker's handle on its stream
pub struct StreamFeed {
    entry: Arc<StreamEntry>,
    hub: Arc<BroadcastHub>,
}

impl StreamFeed {
    pub(crate) fn new(entry: Arc<StreamEntry>, hub: Arc<BroadcastHub>) -> Self {
        Self { entry, hub }
    }

    pub fn stream_id(&self) -> &str {
        self.entry.id()
    }

    /// Report the source's tracks. Audio tracks are dropped when the stream
    /// has `disable_audio` set.
    pub fn report_codecs(&self, codecs: Vec<CodecDescriptor>) {
        let disable_audio = self.entry.config().disable_audio;
        let codecs: Vec<_> = codecs
            .into_iter()
            .filter(|c| !(disable_audio && c.is_audio()))
            .collect();

        tracing::info!(
            stream = %self.entry.id(),
            codecs = ?codecs.iter().map(|c| c.family.name()).collect::<Vec<_>>(),
            "Codecs reported"
        );
        self.entry.set_codecs(codecs);
    }

    /// Fan a packet out to the stream's subscribers
    ///
    /// Packets of tracks that were not reported (or were dropped from the
    /// codec set) are discarded. Returns the number of subscribers reached.
    pub fn publish(&self, packet: MediaPacket) -> usize {
        if !self.entry.has_track(packet.track) {
            return 0;
        }
        self.hub.publish(self.entry.id(), &packet)
    }

    /// Number of subscribers currently attached
    pub fn viewer_count(&self) -> usize {
        self.hub.subscriber_count(self.entry.id())
    }
}
