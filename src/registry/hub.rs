//! Broadcast hub: per-subscriber bounded queues
//!
//! Every subscriber owns its own queue, so a slow consumer only ever loses its
//! own packets. Publishing takes the table's read lock and pushes a clone of
//! the packet (a reference-count bump on the payload) into each queue.
//!
//! # Overflow policy
//!
//! Queues are bounded by `RegistryConfig::queue_capacity`. When a queue is
//! full the **oldest** queued packet is discarded to make room for the new
//! one. The producer never waits on a consumer.
//!
//! ```text
//!              publish(stream, packet)
//!                       │
//!        ┌──────────────┼──────────────┐
//!        ▼              ▼              ▼
//!   [queue #1]     [queue #2]     [queue #3]   (VecDeque, drop-oldest)
//!        │              │              │
//!   Subscription   Subscription   Subscription  (detach on drop)
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use crate::media::MediaPacket;
use crate::stats::metrics::{HubCounters, HubStats};

/// Unique subscription identifier
pub type SubscriptionId = u64;

/// One subscriber's delivery queue
struct SubscriberQueue {
    packets: Mutex<VecDeque<MediaPacket>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            packets: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a packet, returning true if an older packet was discarded
    fn push(&self, packet: MediaPacket) -> bool {
        let dropped = {
            let mut packets = self.packets.lock();
            let dropped = if packets.len() >= self.capacity {
                packets.pop_front();
                true
            } else {
                false
            };
            packets.push_back(packet);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.packets.lock().clear();
        self.notify.notify_one();
    }

    async fn recv(&self) -> Option<MediaPacket> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            if let Some(packet) = self.packets.lock().pop_front() {
                return Some(packet);
            }
            self.notify.notified().await;
        }
    }

    fn len(&self) -> usize {
        self.packets.lock().len()
    }
}

/// Fan-out of media packets to the subscribers of each stream
pub struct BroadcastHub {
    streams: RwLock<HashMap<String, HashMap<SubscriptionId, Arc<SubscriberQueue>>>>,
    next_id: AtomicU64,
    capacity: usize,
    counters: HubCounters,
}

impl BroadcastHub {
    /// Create a hub whose subscriber queues hold `capacity` packets
    pub fn new(capacity: usize) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity,
            counters: HubCounters::default(),
        }
    }

    /// Register a new subscriber on `stream`
    pub fn attach(self: &Arc<Self>, stream: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(self.capacity));

        let subscribers = {
            let mut streams = self.streams.write();
            let subs = streams.entry(stream.to_string()).or_default();
            subs.insert(id, Arc::clone(&queue));
            subs.len()
        };
        self.counters.attached.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(stream = %stream, subscription = id, subscribers, "Subscriber attached");

        Subscription {
            hub: Arc::clone(self),
            stream: stream.to_string(),
            id,
            queue,
        }
    }

    /// Remove a subscriber. Returns false if it was already removed.
    pub fn detach(&self, stream: &str, id: SubscriptionId) -> bool {
        let removed = {
            let mut streams = self.streams.write();
            let removed = streams.get_mut(stream).and_then(|subs| subs.remove(&id));
            if streams.get(stream).is_some_and(|subs| subs.is_empty()) {
                streams.remove(stream);
            }
            removed
        };

        match removed {
            Some(queue) => {
                queue.close();
                self.counters.detached.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(stream = %stream, subscription = id, "Subscriber detached");
                true
            }
            None => false,
        }
    }

    /// Push a packet to every subscriber of `stream`
    ///
    /// Returns the number of subscribers the packet was queued for.
    pub fn publish(&self, stream: &str, packet: &MediaPacket) -> usize {
        let streams = self.streams.read();
        let Some(subs) = streams.get(stream) else {
            return 0;
        };

        let mut dropped = 0;
        for queue in subs.values() {
            if queue.push(packet.clone()) {
                dropped += 1;
            }
        }

        let delivered = subs.len();
        self.counters
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        if dropped > 0 {
            self.counters.dropped.fetch_add(dropped, Ordering::Relaxed);
            tracing::trace!(stream = %stream, dropped, "Dropped oldest packets for slow subscribers");
        }
        delivered
    }

    /// Number of subscribers attached to `stream`
    pub fn subscriber_count(&self, stream: &str) -> usize {
        self.streams.read().get(stream).map_or(0, |subs| subs.len())
    }

    /// Snapshot of hub counters
    pub fn stats(&self) -> HubStats {
        let streams = self.streams.read();
        let active = streams.values().map(|subs| subs.len()).sum();
        self.counters.snapshot(active, streams.len())
    }
}

/// A subscriber's handle: id plus its packet source
///
/// Dropping the handle detaches it from the hub.
pub struct Subscription {
    hub: Arc<BroadcastHub>,
    stream: String,
    id: SubscriptionId,
    queue: Arc<SubscriberQueue>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Wait for the next packet. Returns `None` once detached.
    ///
    /// Cancel safe: a packet is only removed from the queue when this
    /// future completes.
    pub async fn recv(&self) -> Option<MediaPacket> {
        self.queue.recv().await
    }

    /// Packets currently waiting in the queue
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.detach(&self.stream, self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("stream", &self.stream)
            .field("id", &self.id)
            .finish()
    }
}
