//! Statistics for the broadcast hub and relay sessions

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Snapshot of hub-wide counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Subscriptions ever attached
    pub attached: u64,
    /// Subscriptions ever detached
    pub detached: u64,
    /// Packets pushed into subscriber queues
    pub delivered: u64,
    /// Packets discarded because a queue was full (drop-oldest)
    pub dropped: u64,
    /// Subscriptions currently attached
    pub active_subscribers: usize,
    /// Streams with at least one subscriber
    pub active_streams: usize,
}

impl HubStats {
    /// Attachments that have not been matched by a detachment
    pub fn outstanding(&self) -> u64 {
        self.attached.saturating_sub(self.detached)
    }
}

/// Live counters updated by the hub
#[derive(Debug, Default)]
pub(crate) struct HubCounters {
    pub attached: AtomicU64,
    pub detached: AtomicU64,
    pub delivered: AtomicU64,
    pub dropped: AtomicU64,
}

impl HubCounters {
    pub fn snapshot(&self, active_subscribers: usize, active_streams: usize) -> HubStats {
        HubStats {
            attached: self.attached.load(Ordering::Relaxed),
            detached: self.detached.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            active_subscribers,
            active_streams,
        }
    }
}

/// Per-session statistics, reported when the session closes
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Packets written to the protocol sink
    pub forwarded: u64,
    /// Packets discarded while waiting for the first keyframe
    pub discarded_before_keyframe: u64,
    /// Packets dropped because their track was not negotiated
    pub filtered: u64,
    /// Times the liveness deadline was re-armed
    pub deadline_rearms: u64,
    /// Payload bytes written to the sink
    pub bytes_sent: u64,
    /// Session duration
    pub duration: Duration,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Average outbound bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.duration.as_secs();
        if secs > 0 {
            (self.bytes_sent * 8) / secs
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_stats_new() {
        let stats = SessionStats::new();
        assert_eq!(stats.forwarded, 0);
        assert_eq!(stats.discarded_before_keyframe, 0);
        assert_eq!(stats.filtered, 0);
        assert_eq!(stats.bytes_sent, 0);
    }

    #[test]
    fn test_session_stats_bitrate() {
        let stats = SessionStats {
            bytes_sent: 1_000_000,
            duration: Duration::from_secs(10),
            ..Default::default()
        };
        // 1,000,000 bytes * 8 bits / 10 seconds
        assert_eq!(stats.bitrate(), 800_000);
    }

    #[test]
    fn test_session_stats_bitrate_zero_duration() {
        let stats = SessionStats {
            bytes_sent: 1_000_000,
            ..Default::default()
        };
        assert_eq!(stats.bitrate(), 0);
    }

    #[test]
    fn test_hub_counters_snapshot() {
        let counters = HubCounters::default();
        counters.attached.fetch_add(3, Ordering::Relaxed);
        counters.detached.fetch_add(2, Ordering::Relaxed);
        counters.dropped.fetch_add(7, Ordering::Relaxed);

        let stats = counters.snapshot(1, 1);
        assert_eq!(stats.attached, 3);
        assert_eq!(stats.detached, 2);
        assert_eq!(stats.dropped, 7);
        assert_eq!(stats.outstanding(), 1);
        assert_eq!(stats.active_subscribers, 1);
    }
}
