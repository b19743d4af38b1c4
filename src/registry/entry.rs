//! Stream entry and state types
//!
//! This module defines the per-stream state stored in the registry.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use crate::media::CodecDescriptor;

/// Codec set shared between the worker and sessions
pub type CodecSet = Arc<[CodecDescriptor]>;

/// Static configuration of one stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Source location handed to the ingestion worker
    pub url: String,

    /// Start the worker on first viewer and stop it when idle
    #[serde(default)]
    pub on_demand: bool,

    /// Drop audio tracks at ingestion
    #[serde(default)]
    pub disable_audio: bool,
}

impl StreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Mark the stream as on-demand
    pub fn on_demand(mut self, on_demand: bool) -> Self {
        self.on_demand = on_demand;
        self
    }

    /// Drop audio tracks
    pub fn disable_audio(mut self, disable: bool) -> Self {
        self.disable_audio = disable;
        self
    }
}

/// Entry for a single stream in the registry
pub struct StreamEntry {
    id: String,
    config: StreamConfig,

    /// Whether an ingestion worker is active
    running: AtomicBool,

    /// Serializes worker start and stop
    pub(super) activation: Mutex<()>,

    /// Bumped on every activation request, running or not
    demand: AtomicU64,

    /// Codecs reported by the current worker (`None` until reported)
    codecs: watch::Sender<Option<CodecSet>>,

    /// Most recent worker error
    last_error: parking_lot::Mutex<Option<String>>,
}

impl StreamEntry {
    pub(crate) fn new(id: impl Into<String>, config: StreamConfig) -> Self {
        let (codecs, _) = watch::channel(None);
        Self {
            id: id.into(),
            config,
            running: AtomicBool::new(false),
            activation: Mutex::new(()),
            demand: AtomicU64::new(0),
            codecs,
            last_error: parking_lot::Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(super) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Record an activation request. Call with `activation` held.
    pub(super) fn note_demand(&self) {
        self.demand.fetch_add(1, Ordering::AcqRel);
    }

    pub(super) fn demand(&self) -> u64 {
        self.demand.load(Ordering::Acquire)
    }

    /// Currently known codecs
    pub fn codecs(&self) -> Option<CodecSet> {
        self.codecs.borrow().clone()
    }

    /// Whether `track` is part of the reported codec set
    pub fn has_track(&self, track: u8) -> bool {
        self.codecs
            .borrow()
            .as_ref()
            .is_some_and(|codecs| codecs.iter().any(|c| c.track == track))
    }

    /// Publish the codec set reported by the worker
    pub fn set_codecs(&self, codecs: Vec<CodecDescriptor>) {
        self.codecs.send_replace(Some(codecs.into()));
    }

    /// Forget the codec set when the worker stops
    pub(super) fn clear_codecs(&self) {
        self.codecs.send_replace(None);
    }

    pub(super) fn watch_codecs(&self) -> watch::Receiver<Option<CodecSet>> {
        self.codecs.subscribe()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub(super) fn set_last_error(&self, error: String) {
        *self.last_error.lock() = Some(error);
    }
}

impl std::fmt::Debug for StreamEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEntry")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Public view of a stream, served by `GET /stream/list`
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub id: String,
    pub on_demand: bool,
    pub running: bool,
    pub codecs: Vec<String>,
    pub viewers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::CodecFamily;

    #[test]
    fn test_stream_config_defaults() {
        let config: StreamConfig = serde_json::from_str(r#"{"url":"tcp://127.0.0.1:9000"}"#).unwrap();
        assert_eq!(config.url, "tcp://127.0.0.1:9000");
        assert!(!config.on_demand);
        assert!(!config.disable_audio);
    }

    #[test]
    fn test_codecs_lifecycle() {
        let entry = StreamEntry::new("cam", StreamConfig::new("cam").on_demand(true));
        assert!(entry.codecs().is_none());
        assert!(!entry.has_track(0));

        entry.set_codecs(vec![CodecDescriptor::bare(0, CodecFamily::H264)]);
        assert_eq!(entry.codecs().map(|c| c.len()), Some(1));
        assert!(entry.has_track(0));
        assert!(!entry.has_track(1));

        entry.clear_codecs();
        assert!(entry.codecs().is_none());
    }

    #[tokio::test]
    async fn test_watch_sees_codecs() {
        let entry = StreamEntry::new("cam", StreamConfig::new("cam"));
        let mut rx = entry.watch_codecs();
        entry.set_codecs(vec![CodecDescriptor::bare(1, CodecFamily::PcmMulaw)]);

        let codecs = rx.wait_for(|c| c.is_some()).await.unwrap().clone();
        assert_eq!(codecs.map(|c| c[0].family), Some(CodecFamily::PcmMulaw));
    }
}
