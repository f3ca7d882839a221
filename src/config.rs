use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_speed_percent")]
    pub speed_percent: u32,
    #[serde(default = "default_events_per_tick")]
    pub events_per_tick: usize,
    #[serde(default = "default_tick_secs")]
    pub tick_secs: f64,
    /// Pause/stop check granularity of the ingestion thread.
    #[serde(default = "default_slice_ms")]
    pub slice_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Minimum time between two background statistics refreshes.
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,
}

fn default_speed_percent() -> u32 {
    100
}

fn default_events_per_tick() -> usize {
    100
}

fn default_tick_secs() -> f64 {
    1.0
}

fn default_slice_ms() -> u64 {
    10
}

fn default_refresh_ms() -> u64 {
    250
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            speed_percent: default_speed_percent(),
            events_per_tick: default_events_per_tick(),
            tick_secs: default_tick_secs(),
            slice_ms: default_slice_ms(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            refresh_ms: default_refresh_ms(),
        }
    }
}

impl PlaybackConfig {
    pub fn slice(&self) -> Duration {
        Duration::from_millis(self.slice_ms.max(1))
    }
}

impl StatsConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_ms)
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.playback.speed_percent == 0 {
            anyhow::bail!("playback.speed_percent must be positive");
        }
        if config.playback.events_per_tick == 0 {
            anyhow::bail!("playback.events_per_tick must be positive");
        }
        if config.playback.tick_secs.is_nan() || config.playback.tick_secs < 0.0 {
            anyhow::bail!("playback.tick_secs must not be negative");
        }
        Ok(config)
    }
}
