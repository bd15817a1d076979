//! Layered config loading: defaults, optional TOML file, env overrides.

use crate::models::Config;
use crate::validation::{self, ConfigError, ConfigWarning};
use std::env;
use std::path::Path;
use thiserror::Error;

/// Errors surfaced while assembling a config.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: Box<toml::de::Error>,
    },

    #[error("invalid environment override {var}={value}: {reason}")]
    EnvOverride {
        var: String,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

/// A validated config plus any non-fatal warnings found along the way.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    /// The effective configuration.
    pub config: Config,
    /// Suspicious-but-usable settings the operator should see.
    pub warnings: Vec<ConfigWarning>,
}

impl ConfigLoad {
    /// Log every warning at `warn` level.
    pub fn log_warnings(&self) {
        for warning in &self.warnings {
            tracing::warn!("config: {warning}");
        }
    }
}

impl Config {
    /// Load a config from an optional TOML file, apply `WIKIPULSE_*`
    /// environment overrides, and validate the result.
    ///
    /// A `.env` file in the working directory is honored first so local
    /// setups can keep connection URLs out of the shell.
    pub fn load(path: Option<&Path>) -> Result<ConfigLoad, ConfigLoadError> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => {
                let raw =
                    std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
                        path: path.display().to_string(),
                        source,
                    })?;
                toml::from_str(&raw).map_err(|source| ConfigLoadError::Parse {
                    path: path.display().to_string(),
                    source: Box::new(source),
                })?
            }
            None => Config::default(),
        };

        apply_env_overrides(&mut config)?;

        let warnings = validation::validate(&config)?;
        Ok(ConfigLoad { config, warnings })
    }
}

fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigLoadError> {
    if let Ok(url) = env::var("WIKIPULSE_REDIS_URL") {
        config.redis.url = url;
    }
    if let Ok(brokers) = env::var("WIKIPULSE_KAFKA_BROKERS") {
        config.kafka.brokers = brokers;
    }
    if let Ok(topic) = env::var("WIKIPULSE_KAFKA_TOPIC") {
        config.kafka.topic = topic;
    }
    if let Ok(url) = env::var("WIKIPULSE_STREAM_URL") {
        config.ingest.stream_url = url;
    }
    if let Ok(host) = env::var("WIKIPULSE_SERVER_HOST") {
        config.server.host = host;
    }
    if let Ok(port) = env::var("WIKIPULSE_SERVER_PORT") {
        config.server.port = parse_env("WIKIPULSE_SERVER_PORT", &port)?;
    }
    if let Ok(langs) = env::var("WIKIPULSE_LANGUAGES") {
        config.ingest.languages = langs
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(flag) = env::var("WIKIPULSE_EXCLUDE_BOTS") {
        config.ingest.exclude_bots = parse_env("WIKIPULSE_EXCLUDE_BOTS", &flag)?;
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigLoadError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| ConfigLoadError::EnvOverride {
            var: var.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}
