//! Stream registry implementation
//!
//! The registry knows every stream, starts ingestion workers on demand, and
//! answers codec queries. Media routing itself is done by the
//! [`BroadcastHub`]; the registry only exposes attach/detach on top of it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use super::config::RegistryConfig;
use super::entry::{CodecSet, StreamConfig, StreamEntry, StreamInfo};
use super::hub::{BroadcastHub, Subscription, SubscriptionId};
use crate::error::{Error, Result};
use crate::ingest::{Ingest, StreamFeed};

/// How a worker run ended
enum WorkerExit {
    Source(Result<()>),
    Idle,
}

/// Central registry for all known streams
///
/// Thread-safe via `RwLock`. Lookups take the read lock; only adding a stream
/// takes the write lock. Worker start is serialized per stream by the entry's
/// activation mutex.
pub struct StreamRegistry {
    /// Map of stream id to stream entry
    streams: RwLock<HashMap<String, Arc<StreamEntry>>>,

    /// Packet fan-out
    hub: Arc<BroadcastHub>,

    /// Worker implementation
    ingest: Arc<dyn Ingest>,

    /// Configuration
    config: RegistryConfig,

    /// Most recent worker error across all streams
    last_error: parking_lot::Mutex<Option<String>>,

    /// Workers started since creation
    workers_started: AtomicU64,
}

impl StreamRegistry {
    /// Create a new registry backed by `ingest`
    pub fn new(config: RegistryConfig, ingest: Arc<dyn Ingest>) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            hub: Arc::new(BroadcastHub::new(config.queue_capacity)),
            ingest,
            config,
            last_error: parking_lot::Mutex::new(None),
            workers_started: AtomicU64::new(0),
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Get the broadcast hub
    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Register a stream. An existing entry with the same id is kept.
    pub async fn add_stream(&self, id: &str, config: StreamConfig) -> Arc<StreamEntry> {
        let mut streams = self.streams.write().await;
        let entry = streams.entry(id.to_string()).or_insert_with(|| {
            tracing::info!(
                stream = %id,
                url = %config.url,
                on_demand = config.on_demand,
                "Stream registered"
            );
            Arc::new(StreamEntry::new(id, config))
        });
        Arc::clone(entry)
    }

    /// Look up a stream, registering an on-demand stream whose source is the
    /// id itself if it is unknown.
    pub async fn ensure_stream(&self, id: &str) -> Arc<StreamEntry> {
        if let Some(entry) = self.entry(id).await {
            return entry;
        }
        self.add_stream(id, StreamConfig::new(id).on_demand(true))
            .await
    }

    /// Get a stream entry
    pub async fn entry(&self, id: &str) -> Option<Arc<StreamEntry>> {
        self.streams.read().await.get(id).cloned()
    }

    /// Check if a stream is registered
    pub async fn exists(&self, id: &str) -> bool {
        self.streams.read().await.contains_key(id)
    }

    /// All stream configurations plus their ids in sorted order
    pub async fn list_known_streams(&self) -> (HashMap<String, StreamConfig>, Vec<String>) {
        let streams = self.streams.read().await;
        let map: HashMap<_, _> = streams
            .iter()
            .map(|(id, entry)| (id.clone(), entry.config().clone()))
            .collect();
        let mut ids: Vec<_> = map.keys().cloned().collect();
        ids.sort();
        (map, ids)
    }

    /// Public view of every stream, sorted by id
    pub async fn stream_infos(&self) -> Vec<StreamInfo> {
        let streams = self.streams.read().await;
        let mut infos: Vec<_> = streams
            .values()
            .map(|entry| StreamInfo {
                id: entry.id().to_string(),
                on_demand: entry.config().on_demand,
                running: entry.is_running(),
                codecs: entry
                    .codecs()
                    .map(|codecs| codecs.iter().map(|c| c.family.name().to_string()).collect())
                    .unwrap_or_default(),
                viewers: self.hub.subscriber_count(entry.id()),
                last_error: entry.last_error(),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Start the stream's ingestion worker unless one is already running
    ///
    /// Concurrent callers for the same stream serialize on the entry's
    /// activation lock, so exactly one of them starts the worker.
    pub async fn ensure_running(self: &Arc<Self>, id: &str) -> Result<()> {
        let entry = self
            .entry(id)
            .await
            .ok_or_else(|| Error::StreamNotFound(id.to_string()))?;

        let _guard = entry.activation.lock().await;
        entry.note_demand();
        if entry.is_running() {
            return Ok(());
        }
        entry.set_running(true);
        self.workers_started.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            stream = %id,
            url = %entry.config().url,
            on_demand = entry.config().on_demand,
            "Starting ingestion worker"
        );

        let registry = Arc::clone(self);
        let worker_entry = Arc::clone(&entry);
        tokio::spawn(async move { registry.run_worker(worker_entry).await });

        Ok(())
    }

    /// Codecs of a stream, activating it first
    ///
    /// Waits up to `codec_wait` for a fresh worker to report. Returns `None`
    /// if the stream is unknown or its codecs are not ready.
    pub async fn codecs_for(self: &Arc<Self>, id: &str) -> Option<CodecSet> {
        let entry = self.entry(id).await?;
        if let Err(e) = self.ensure_running(id).await {
            tracing::warn!(stream = %id, error = %e, "Activation failed");
            return None;
        }

        let mut rx = entry.watch_codecs();
        let codecs = match tokio::time::timeout(self.config.codec_wait, rx.wait_for(|c| c.is_some()))
            .await
        {
            Ok(Ok(codecs)) => codecs.clone(),
            _ => None,
        };

        if codecs.is_none() {
            tracing::debug!(stream = %id, "Codecs not ready");
        }
        codecs
    }

    /// Subscribe to a stream's packets
    pub async fn attach(&self, id: &str) -> Result<Subscription> {
        if !self.exists(id).await {
            return Err(Error::StreamNotFound(id.to_string()));
        }
        Ok(self.hub.attach(id))
    }

    /// Remove a subscription. Idempotent.
    pub fn detach(&self, id: &str, subscription: SubscriptionId) -> bool {
        self.hub.detach(id, subscription)
    }

    pub fn ice_servers(&self) -> &[String] {
        &self.config.ice.servers
    }

    pub fn ice_username(&self) -> &str {
        &self.config.ice.username
    }

    pub fn ice_credential(&self) -> &str {
        &self.config.ice.credential
    }

    /// Local UDP port range for WebRTC, if one is configured
    pub fn webrtc_port_range(&self) -> Option<(u16, u16)> {
        let (min, max) = (self.config.ice.port_min, self.config.ice.port_max);
        if min > 0 && max >= min {
            Some((min, max))
        } else {
            None
        }
    }

    /// Most recent worker error across all streams
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Number of workers started since creation
    pub fn workers_started(&self) -> u64 {
        self.workers_started.load(Ordering::Relaxed)
    }

    /// Start the worker of every stream that is not on-demand
    pub async fn start_always_on(self: &Arc<Self>) {
        let ids: Vec<String> = {
            let streams = self.streams.read().await;
            streams
                .values()
                .filter(|entry| !entry.config().on_demand)
                .map(|entry| entry.id().to_string())
                .collect()
        };

        for id in ids {
            if let Err(e) = self.ensure_running(&id).await {
                tracing::warn!(stream = %id, error = %e, "Failed to start stream");
            }
        }
    }

    async fn run_worker(self: Arc<Self>, entry: Arc<StreamEntry>) {
        let id = entry.id().to_string();
        let on_demand = entry.config().on_demand;

        loop {
            let demand = entry.demand();
            let feed = StreamFeed::new(Arc::clone(&entry), Arc::clone(&self.hub));
            let exit = if on_demand {
                tokio::select! {
                    result = self.ingest.run(entry.config(), feed) => WorkerExit::Source(result),
                    _ = self.idle_watch(&id) => WorkerExit::Idle,
                }
            } else {
                WorkerExit::Source(self.ingest.run(entry.config(), feed).await)
            };
            entry.clear_codecs();

            match exit {
                WorkerExit::Idle => {
                    if self.retire(&entry, demand).await {
                        tracing::info!(stream = %id, "No viewers, stopped on-demand worker");
                        return;
                    }
                    tracing::debug!(stream = %id, "Viewer arrived while idle, keeping worker");
                    continue;
                }
                WorkerExit::Source(Ok(())) => {
                    tracing::info!(stream = %id, "Source ended");
                }
                WorkerExit::Source(Err(e)) => {
                    let message = e.to_string();
                    tracing::warn!(stream = %id, error = %message, "Ingestion failed");
                    entry.set_last_error(message.clone());
                    *self.last_error.lock() = Some(format!("{}: {}", id, message));
                }
            }

            if on_demand && self.retire(&entry, demand).await {
                tracing::info!(stream = %id, "Ingestion worker stopped");
                return;
            }
            tokio::time::sleep(self.config.restart_delay).await;
        }
    }

    /// Mark the worker stopped unless a viewer attached or asked for the
    /// stream since `demand` was sampled
    ///
    /// Runs under the activation lock, so a concurrent `ensure_running`
    /// either sees the worker still running and bumps the demand first, or
    /// sees it stopped and starts a new one.
    async fn retire(&self, entry: &StreamEntry, demand: u64) -> bool {
        let _guard = entry.activation.lock().await;
        if self.hub.subscriber_count(entry.id()) > 0 || entry.demand() != demand {
            return false;
        }
        entry.set_running(false);
        true
    }

    /// Resolve once the stream has had no subscribers for `idle_timeout`
    async fn idle_watch(&self, id: &str) {
        let timeout = self.config.idle_timeout;
        let period = (timeout / 4).clamp(Duration::from_millis(10), Duration::from_secs(1));
        let mut ticker = tokio::time::interval(period);
        let mut idle_since: Option<Instant> = None;

        loop {
            ticker.tick().await;
            if self.hub.subscriber_count(id) > 0 {
                idle_since = None;
                continue;
            }
            let since = *idle_since.get_or_insert_with(Instant::now);
            if since.elapsed() >= timeout {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::media::{CodecDescriptor, CodecFamily};

    /// Reports fixed codecs, then idles until released
    #[derive(Default)]
    struct FakeIngest {
        runs: AtomicUsize,
        release: Notify,
        fail: bool,
    }

    #[async_trait]
    impl Ingest for FakeIngest {
        async fn run(&self, _config: &StreamConfig, feed: StreamFeed) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::ActivationFailed("connection refused".into()));
            }
            feed.report_codecs(vec![
                CodecDescriptor::bare(0, CodecFamily::H264),
                CodecDescriptor::bare(1, CodecFamily::Aac),
            ]);
            self.release.notified().await;
            Ok(())
        }
    }

    fn registry_with_idle(ingest: Arc<FakeIngest>, idle: Duration) -> Arc<StreamRegistry> {
        let config = RegistryConfig::default()
            .codec_wait(Duration::from_millis(500))
            .idle_timeout(idle)
            .restart_delay(Duration::from_millis(10));
        Arc::new(StreamRegistry::new(config, ingest))
    }

    fn registry(ingest: Arc<FakeIngest>) -> Arc<StreamRegistry> {
        registry_with_idle(ingest, Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_unknown_stream() {
        let registry = registry(Arc::new(FakeIngest::default()));
        assert!(!registry.exists("missing").await);
        assert!(matches!(
            registry.ensure_running("missing").await,
            Err(Error::StreamNotFound(_))
        ));
        assert!(registry.codecs_for("missing").await.is_none());
        assert!(registry.attach("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_ensure_running_starts_one_worker() {
        let ingest = Arc::new(FakeIngest::default());
        let registry = registry(Arc::clone(&ingest));
        registry
            .add_stream("cam", StreamConfig::new("tcp://cam").on_demand(true))
            .await;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.ensure_running("cam").await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(registry.workers_started(), 1);
        let codecs = registry.codecs_for("cam").await.unwrap();
        assert_eq!(codecs.len(), 2);
        assert_eq!(ingest.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ensure_stream_creates_on_demand_entry() {
        let registry = registry(Arc::new(FakeIngest::default()));
        let entry = registry.ensure_stream("rtsp://camera/1").await;
        assert!(entry.config().on_demand);
        assert_eq!(entry.config().url, "rtsp://camera/1");

        let again = registry.ensure_stream("rtsp://camera/1").await;
        assert!(Arc::ptr_eq(&entry, &again));
    }

    #[tokio::test]
    async fn test_list_known_streams_sorted() {
        let registry = registry(Arc::new(FakeIngest::default()));
        registry.add_stream("b", StreamConfig::new("b")).await;
        registry.add_stream("a", StreamConfig::new("a")).await;

        let (map, ids) = registry.list_known_streams().await;
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(map["a"].url, "a");
    }

    #[tokio::test]
    async fn test_on_demand_worker_stops_when_idle() {
        let ingest = Arc::new(FakeIngest::default());
        let registry = registry_with_idle(Arc::clone(&ingest), Duration::from_millis(100));
        let entry = registry
            .add_stream("cam", StreamConfig::new("tcp://cam").on_demand(true))
            .await;

        assert!(registry.codecs_for("cam").await.is_some());
        assert!(entry.is_running());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!entry.is_running());
        assert!(entry.codecs().is_none());

        // A new viewer restarts it
        registry.ensure_running("cam").await.unwrap();
        assert_eq!(registry.workers_started(), 2);
    }

    #[tokio::test]
    async fn test_activation_during_idle_keeps_worker() {
        let ingest = Arc::new(FakeIngest::default());
        let registry = registry_with_idle(Arc::clone(&ingest), Duration::from_millis(100));
        let entry = registry
            .add_stream("cam", StreamConfig::new("tcp://cam").on_demand(true))
            .await;

        // Viewers keep asking for codecs across several idle deadlines
        // without attaching; every request must be answered
        for _ in 0..12 {
            assert!(registry.codecs_for("cam").await.is_some());
            assert!(entry.is_running());
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        assert_eq!(registry.workers_started(), 1);
        assert!(ingest.runs.load(Ordering::SeqCst) >= 2);

        // Once requests stop the worker winds down
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!entry.is_running());
        assert!(entry.codecs().is_none());
    }

    #[tokio::test]
    async fn test_worker_failure_recorded() {
        let ingest = Arc::new(FakeIngest {
            fail: true,
            ..Default::default()
        });
        let registry = registry(ingest);
        let entry = registry
            .add_stream("cam", StreamConfig::new("tcp://cam").on_demand(true))
            .await;

        assert!(registry.codecs_for("cam").await.is_none());
        assert!(entry.last_error().unwrap().contains("connection refused"));
        assert!(registry.last_error().unwrap().starts_with("cam:"));
    }

    #[tokio::test]
    async fn test_attach_detach_through_registry() {
        let registry = registry(Arc::new(FakeIngest::default()));
        registry.add_stream("cam", StreamConfig::new("cam")).await;

        let sub = registry.attach("cam").await.unwrap();
        assert_eq!(registry.hub().subscriber_count("cam"), 1);
        assert!(registry.detach("cam", sub.id()));
        assert!(!registry.detach("cam", sub.id()));
        drop(sub);

        let stats = registry.hub().stats();
        assert_eq!(stats.attached, stats.detached);
    }

    #[test]
    fn test_webrtc_port_range() {
        let mut config = RegistryConfig::default();
        let ingest: Arc<dyn Ingest> = Arc::new(FakeIngest::default());
        assert!(StreamRegistry::new(config.clone(), Arc::clone(&ingest))
            .webrtc_port_range()
            .is_none());

        config.ice.port_min = 50000;
        config.ice.port_max = 50100;
        assert_eq!(
            StreamRegistry::new(config, ingest).webrtc_port_range(),
            Some((50000, 50100))
        );
    }
}
