//! Statistics

pub mod metrics;

pub use metrics::{HubStats, SessionStats};
