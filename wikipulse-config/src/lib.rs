//! Shared configuration library for WikiPulse.
//!
//! This crate centralizes config loading and validation for all three
//! WikiPulse binaries. A config is assembled in three layers: built-in
//! defaults, an optional TOML file (`--config PATH`), then `WIKIPULSE_*`
//! environment variable overrides. Validation produces hard errors for
//! values the pipeline cannot run with and warnings for values that are
//! merely suspicious.

pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError};
pub use models::{
    AlertsConfig, Config, EditWarConfig, FanoutConfig, HotPagesConfig, IngestConfig, KafkaConfig,
    MonitorConfig, RedisConfig, ServerConfig, SpikeConfig, TrendingConfig,
};
pub use validation::{ConfigError, ConfigWarning};
