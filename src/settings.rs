//! File and environment configuration
//!
//! Sources, lowest priority first: defaults, the config file (any format
//! the `config` crate recognizes by extension), then `RELAY__*` environment
//! variables (`RELAY__SERVER__LISTEN`, `RELAY__ICE__SERVERS=stun:a,stun:b`).
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8083"
//!
//! [ice]
//! servers = ["stun:stun.l.google.com:19302"]
//!
//! [streams.cam1]
//! url = "tcp://127.0.0.1:9000"
//! on_demand = true
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::registry::{IceConfig, RegistryConfig, StreamConfig};
use crate::server::ServerConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub listen: String,
    pub max_sessions: usize,
    pub allow_dynamic_streams: bool,
    pub liveness_window_secs: u64,
    pub write_deadline_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            listen: defaults.bind_addr.to_string(),
            max_sessions: defaults.max_sessions,
            allow_dynamic_streams: defaults.allow_dynamic_streams,
            liveness_window_secs: defaults.liveness_window.as_secs(),
            write_deadline_secs: defaults.write_deadline.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub queue_capacity: usize,
    pub codec_wait_ms: u64,
    pub idle_timeout_secs: u64,
    pub restart_delay_ms: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        let defaults = RegistryConfig::default();
        Self {
            queue_capacity: defaults.queue_capacity,
            codec_wait_ms: defaults.codec_wait.as_millis() as u64,
            idle_timeout_secs: defaults.idle_timeout.as_secs(),
            restart_delay_ms: defaults.restart_delay.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IceSettings {
    pub servers: Vec<String>,
    pub username: String,
    pub credential: String,
    pub port_min: u16,
    pub port_max: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub level: String,
    /// `compact` or `json`
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Everything the binary reads from configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub registry: RegistrySettings,
    pub ice: IceSettings,
    pub logging: LoggingSettings,
    pub streams: HashMap<String, StreamConfig>,
}

impl Settings {
    /// Load from an optional file plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("RELAY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("ice.servers"),
        );

        builder.build()?.try_deserialize()
    }

    /// Runtime server configuration
    pub fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        let bind_addr: SocketAddr = self.server.listen.parse().map_err(|e| {
            ConfigError::Message(format!("invalid listen address {:?}: {}", self.server.listen, e))
        })?;

        let registry = RegistryConfig::default()
            .queue_capacity(self.registry.queue_capacity)
            .codec_wait(Duration::from_millis(self.registry.codec_wait_ms))
            .idle_timeout(Duration::from_secs(self.registry.idle_timeout_secs))
            .restart_delay(Duration::from_millis(self.registry.restart_delay_ms))
            .ice(IceConfig {
                servers: self.ice.servers.clone(),
                username: self.ice.username.clone(),
                credential: self.ice.credential.clone(),
                port_min: self.ice.port_min,
                port_max: self.ice.port_max,
            });

        let mut config = ServerConfig::with_addr(bind_addr)
            .max_sessions(self.server.max_sessions)
            .liveness_window(Duration::from_secs(self.server.liveness_window_secs))
            .write_deadline(Duration::from_secs(self.server.write_deadline_secs))
            .registry(registry);
        if !self.server.allow_dynamic_streams {
            config = config.disable_dynamic_streams();
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_round_trip_to_server_config() {
        let config = Settings::default().server_config().unwrap();
        let defaults = ServerConfig::default();

        assert_eq!(config.bind_addr, defaults.bind_addr);
        assert_eq!(config.liveness_window, defaults.liveness_window);
        assert_eq!(config.registry.queue_capacity, 256);
        assert_eq!(config.registry.codec_wait, Duration::from_secs(5));
    }

    #[test]
    fn test_load_toml_file() {
        let dir = std::env::temp_dir().join(format!("live-relay-settings-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("relay.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[server]
listen = "127.0.0.1:9999"
max_sessions = 8

[ice]
servers = ["stun:stun.example.org:3478"]
port_min = 40000
port_max = 40100

[streams.cam1]
url = "tcp://10.0.0.5:9000"
on_demand = true

[streams.lobby]
url = "/var/media/lobby.flv"
disable_audio = true
"#
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(settings.streams.len(), 2);
        assert!(settings.streams["cam1"].on_demand);
        assert!(settings.streams["lobby"].disable_audio);

        let config = settings.server_config().unwrap();
        assert_eq!(config.bind_addr.port(), 9999);
        assert_eq!(config.max_sessions, 8);
        assert_eq!(config.registry.ice.servers.len(), 1);
        assert_eq!(config.registry.ice.port_min, 40000);
    }

    #[test]
    fn test_invalid_listen_address() {
        let mut settings = Settings::default();
        settings.server.listen = "not an address".into();
        assert!(settings.server_config().is_err());
    }
}
