//! Relay server
//!
//! - `config`: runtime server options
//! - `state`: state shared by the HTTP and signaling gateways
//! - `listener`: binds the listener and serves the router

pub mod config;
pub mod listener;
pub mod state;

pub use config::ServerConfig;
pub use listener::RelayServer;
pub use state::AppState;
