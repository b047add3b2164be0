use crate::assets::{
    DEFAULT_FRAME_RATE, EVENT_CHANNEL_CAPACITY, MAX_FRAME_RATE, STATS_INTERVAL_SECS,
    STREAM_CHANNEL_CAPACITY,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Runtime settings of a pump and of the outgoing stream it feeds.
///
/// Every field has a default so partial JSON documents are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    /// Cadence used while no sink is assigned
    pub default_fps: u32,
    pub event_capacity: usize,
    pub stream_capacity: usize,
    /// Period of the health summary log line, 0 disables it
    pub stats_interval_secs: u64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        PumpConfig {
            default_fps: DEFAULT_FRAME_RATE,
            event_capacity: EVENT_CHANNEL_CAPACITY,
            stream_capacity: STREAM_CHANNEL_CAPACITY,
            stats_interval_secs: STATS_INTERVAL_SECS,
        }
    }
}

impl PumpConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PumpConfig =
            serde_json::from_str(json).context("Failed to parse pump config")?;
        Ok(config.sanitized())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        match self.stats_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    // a zero default rate would make the idle cadence infinite and a zero
    // capacity would make tokio channels panic
    fn sanitized(mut self) -> Self {
        self.default_fps = self.default_fps.clamp(1, MAX_FRAME_RATE);
        self.event_capacity = self.event_capacity.max(1);
        self.stream_capacity = self.stream_capacity.max(1);
        self
    }
}

/// Returns a version as specified in Cargo.toml
pub fn app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
