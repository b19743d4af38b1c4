//! Registry configuration

use std::time::Duration;

/// ICE settings handed to every peer connection
#[derive(Debug, Clone, Default)]
pub struct IceConfig {
    /// STUN/TURN server URLs
    pub servers: Vec<String>,
    /// TURN username
    pub username: String,
    /// TURN credential
    pub credential: String,
    /// Lowest local UDP port for WebRTC (0 = OS chooses)
    pub port_min: u16,
    /// Highest local UDP port for WebRTC (0 = OS chooses)
    pub port_max: u16,
}

/// Configuration for the stream registry and its broadcast hub
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Packets buffered per subscriber before the oldest is dropped
    pub queue_capacity: usize,

    /// How long `codecs_for` waits for a freshly started worker to report codecs
    pub codec_wait: Duration,

    /// How long an on-demand worker keeps running with no viewers
    pub idle_timeout: Duration,

    /// Delay before an always-on worker restarts after its source ends
    pub restart_delay: Duration,

    /// ICE settings
    pub ice: IceConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            codec_wait: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
            restart_delay: Duration::from_secs(1),
            ice: IceConfig::default(),
        }
    }
}

impl RegistryConfig {
    /// Set the per-subscriber queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set how long to wait for codecs after activation
    pub fn codec_wait(mut self, wait: Duration) -> Self {
        self.codec_wait = wait;
        self
    }

    /// Set the on-demand idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the always-on restart delay
    pub fn restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Set the ICE settings
    pub fn ice(mut self, ice: IceConfig) -> Self {
        self.ice = ice;
        self
    }
}
