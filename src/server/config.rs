//! Server configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::registry::RegistryConfig;
use crate::session::LIVENESS_WINDOW;
use crate::signaling::channel::WRITE_DEADLINE;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8083;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent sessions (0 = unlimited)
    pub max_sessions: usize,

    /// Create on-demand streams for unknown ids on the signaling channel
    pub allow_dynamic_streams: bool,

    /// Session closes when no keyframe arrives within this window
    pub liveness_window: Duration,

    /// Deadline for each write on a signaling channel
    pub write_deadline: Duration,

    /// Stream registry settings
    pub registry: RegistryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_sessions: 0, // Unlimited
            allow_dynamic_streams: true,
            liveness_window: LIVENESS_WINDOW,
            write_deadline: WRITE_DEADLINE,
            registry: RegistryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum concurrent sessions
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Refuse unknown stream ids on the signaling channel
    pub fn disable_dynamic_streams(mut self) -> Self {
        self.allow_dynamic_streams = false;
        self
    }

    /// Set the liveness window
    pub fn liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }

    /// Set the signaling write deadline
    pub fn write_deadline(mut self, deadline: Duration) -> Self {
        self.write_deadline = deadline;
        self
    }

    /// Set the registry configuration
    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }
}
