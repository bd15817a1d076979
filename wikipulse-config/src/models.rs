//! Typed configuration sections and their defaults.
//!
//! Every section derives `Deserialize` with `#[serde(default)]` so a
//! partial TOML file only overrides what it names. Interval-like fields
//! are stored as plain seconds and exposed as [`Duration`] accessors.

use serde::Deserialize;
use std::time::Duration;

/// Root configuration shared by the ingestor, processor and api-host.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listener settings (api-host only).
    pub server: ServerConfig,
    /// Shared KV store connection.
    pub redis: RedisConfig,
    /// Partitioned log connection and topic.
    pub kafka: KafkaConfig,
    /// Upstream event-stream and ingest filters.
    pub ingest: IngestConfig,
    /// Hot-page tracker bounds.
    pub hot_pages: HotPagesConfig,
    /// Spike detector thresholds.
    pub spike: SpikeConfig,
    /// Edit-war detector thresholds.
    pub edit_war: EditWarConfig,
    /// Trending scorer settings.
    pub trending: TrendingConfig,
    /// Alert retention.
    pub alerts: AlertsConfig,
    /// Fan-out hub settings.
    pub fanout: FanoutConfig,
    /// Resource monitor thresholds.
    pub monitor: MonitorConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Shared KV store connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Partitioned log connection and topic.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap servers.
    pub brokers: String,
    /// Topic carrying normalized edits.
    pub topic: String,
    /// Prefix for per-detector consumer group ids.
    pub group_prefix: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topic: "wikipedia.edits".to_string(),
            group_prefix: "wikipulse".to_string(),
        }
    }
}

/// Upstream event-stream endpoint and boundary filters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// SSE endpoint delivering recent changes.
    pub stream_url: String,
    /// Language whitelist; empty allows every language.
    pub languages: Vec<String>,
    /// Drop edits made by bot accounts at the boundary.
    pub exclude_bots: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            stream_url: "https://stream.wikimedia.org/v2/stream/recentchange".to_string(),
            languages: Vec::new(),
            exclude_bots: false,
        }
    }
}

/// Hot-page tracker bounds and windows.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HotPagesConfig {
    /// Hard cap on concurrently tracked hot pages.
    pub max_tracked: u64,
    /// Edits within the window needed to promote a page.
    pub promotion_threshold: u64,
    /// Activity window length, seconds.
    pub window_secs: u64,
    /// Editor-set cap per page.
    pub max_members_per_page: u64,
    /// Recent-edits ring capacity per page.
    pub window_capacity: u64,
    /// Eviction sweep period, seconds.
    pub cleanup_interval_secs: u64,
}

impl Default for HotPagesConfig {
    fn default() -> Self {
        Self {
            max_tracked: 500,
            promotion_threshold: 3,
            window_secs: 900,
            max_members_per_page: 50,
            window_capacity: 20,
            cleanup_interval_secs: 60,
        }
    }
}

impl HotPagesConfig {
    /// Activity window as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Eviction sweep period as a [`Duration`].
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Spike detector thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpikeConfig {
    /// Minimum short-window/baseline ratio to emit.
    pub ratio_min: f64,
    /// Minimum five-minute edit count to qualify.
    pub min_edits: u64,
    /// Repeat-suppression window after an alert, seconds.
    pub cooldown_secs: u64,
}

impl Default for SpikeConfig {
    fn default() -> Self {
        Self {
            ratio_min: 2.0,
            min_edits: 10,
            cooldown_secs: 300,
        }
    }
}

impl SpikeConfig {
    /// Cooldown as a [`Duration`].
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Edit-war detector thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EditWarConfig {
    /// Minimum distinct editors in the ring.
    pub min_editors: u32,
    /// Minimum reverts in the ring.
    pub min_reverts: u32,
    /// Minimum adjacent differing-editor pairs.
    pub min_interleave: u32,
    /// Repeat-suppression window while a war is ongoing, seconds.
    pub cooldown_secs: u64,
    /// Revert-count growth needed to update an alert under cooldown.
    pub update_delta: u32,
}

impl Default for EditWarConfig {
    fn default() -> Self {
        Self {
            min_editors: 3,
            min_reverts: 3,
            min_interleave: 4,
            cooldown_secs: 600,
            update_delta: 2,
        }
    }
}

impl EditWarConfig {
    /// Cooldown as a [`Duration`].
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Trending scorer settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrendingConfig {
    /// Leaderboard cap.
    pub max_pages: u64,
    /// Score half-life, minutes.
    pub half_life_minutes: u64,
    /// Background prune period, seconds.
    pub prune_interval_secs: u64,
    /// Scores decayed below this are pruned.
    pub score_floor: f64,
}

impl Default for TrendingConfig {
    fn default() -> Self {
        Self {
            max_pages: 200,
            half_life_minutes: 30,
            prune_interval_secs: 60,
            score_floor: 1e-6,
        }
    }
}

impl TrendingConfig {
    /// Half-life in seconds.
    pub fn half_life_secs(&self) -> f64 {
        self.half_life_minutes as f64 * 60.0
    }

    /// Prune period as a [`Duration`].
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }
}

/// Alert retention bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Entries kept per alert list.
    pub keep: u64,
    /// TTL on alert keys, seconds.
    pub ttl_secs: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            keep: 100,
            ttl_secs: 86_400,
        }
    }
}

impl AlertsConfig {
    /// Alert TTL as a [`Duration`].
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Fan-out hub settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Per-subscriber egress buffer, messages.
    pub buffer_size: usize,
    /// Drops within the drop window that force-close a subscriber.
    pub drop_threshold: u64,
    /// Window over which drops are counted, seconds.
    pub drop_window_secs: u64,
    /// Idle time before the hub pings a subscriber, seconds.
    pub idle_ping_secs: u64,
    /// Grace after a ping before the subscriber is closed, seconds.
    pub pong_grace_secs: u64,
    /// WebSocket upgrades allowed per IP per minute.
    pub connects_per_minute: u64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            drop_threshold: 100,
            drop_window_secs: 60,
            idle_ping_secs: 60,
            pong_grace_secs: 30,
            connects_per_minute: 30,
        }
    }
}

/// Resource monitor thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Probe period, seconds.
    pub probe_interval_secs: u64,
    /// Redis used-memory percentage that trips the breaker.
    pub memory_pct_max: f64,
    /// Consumer lag (messages) that trips the breaker.
    pub lag_max: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 15,
            memory_pct_max: 80.0,
            lag_max: 1000,
        }
    }
}

impl MonitorConfig {
    /// Probe period as a [`Duration`].
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}
