//! Guard-rail validation: hard errors for configs the pipeline cannot
//! run with, warnings for settings that are legal but suspicious.

use crate::models::Config;
use std::fmt;
use thiserror::Error;

/// A config value the pipeline refuses to start with.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{section}.{field} must be greater than zero")]
    Zero {
        section: &'static str,
        field: &'static str,
    },

    #[error("{section}.{field} is {value} but must be at most {max}")]
    TooLarge {
        section: &'static str,
        field: &'static str,
        value: u64,
        max: u64,
    },

    #[error("{section}.{field} must not be empty")]
    Empty {
        section: &'static str,
        field: &'static str,
    },

    #[error("spike.ratio_min is {0} but must be at least 1.0")]
    SpikeRatioBelowOne(f64),
}

/// A legal-but-suspicious setting, logged at startup.
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    message: String,
}

impl ConfigWarning {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Check a config, returning warnings on success.
pub fn validate(config: &Config) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut warnings = Vec::new();

    require_nonzero("hot_pages", "max_tracked", config.hot_pages.max_tracked)?;
    require_nonzero(
        "hot_pages",
        "promotion_threshold",
        config.hot_pages.promotion_threshold,
    )?;
    require_nonzero("hot_pages", "window_secs", config.hot_pages.window_secs)?;
    require_nonzero(
        "hot_pages",
        "max_members_per_page",
        config.hot_pages.max_members_per_page,
    )?;
    require_nonzero(
        "hot_pages",
        "window_capacity",
        config.hot_pages.window_capacity,
    )?;
    require_nonzero(
        "hot_pages",
        "cleanup_interval_secs",
        config.hot_pages.cleanup_interval_secs,
    )?;
    require_nonzero(
        "trending",
        "half_life_minutes",
        config.trending.half_life_minutes,
    )?;
    require_nonzero("trending", "max_pages", config.trending.max_pages)?;
    require_nonzero("alerts", "keep", config.alerts.keep)?;
    require_nonzero("fanout", "buffer_size", config.fanout.buffer_size as u64)?;
    require_nonempty("redis", "url", &config.redis.url)?;
    require_nonempty("kafka", "brokers", &config.kafka.brokers)?;
    require_nonempty("kafka", "topic", &config.kafka.topic)?;
    require_nonempty("ingest", "stream_url", &config.ingest.stream_url)?;

    if config.spike.ratio_min < 1.0 {
        return Err(ConfigError::SpikeRatioBelowOne(config.spike.ratio_min));
    }

    if config.hot_pages.max_tracked > 100_000 {
        return Err(ConfigError::TooLarge {
            section: "hot_pages",
            field: "max_tracked",
            value: config.hot_pages.max_tracked,
            max: 100_000,
        });
    }

    if config.hot_pages.max_tracked > 10_000 {
        warnings.push(ConfigWarning::new(format!(
            "hot_pages.max_tracked = {} will keep a large working set in the KV",
            config.hot_pages.max_tracked
        )));
    }
    if config.spike.cooldown_secs < 60 {
        warnings.push(ConfigWarning::new(format!(
            "spike.cooldown_secs = {} allows very frequent repeat alerts",
            config.spike.cooldown_secs
        )));
    }
    if config.edit_war.min_editors < 2 {
        warnings.push(ConfigWarning::new(
            "edit_war.min_editors < 2 classifies single-editor churn as a war",
        ));
    }
    if config.hot_pages.window_capacity < 10 {
        warnings.push(ConfigWarning::new(format!(
            "hot_pages.window_capacity = {} gives the edit-war detector very little history",
            config.hot_pages.window_capacity
        )));
    }
    if config.trending.prune_interval_secs > config.hot_pages.window_secs {
        warnings.push(ConfigWarning::new(
            "trending.prune_interval_secs exceeds the activity window; the leaderboard may hold stale entries",
        ));
    }

    Ok(warnings)
}

fn require_nonzero(
    section: &'static str,
    field: &'static str,
    value: u64,
) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::Zero { section, field })
    } else {
        Ok(())
    }
}

fn require_nonempty(
    section: &'static str,
    field: &'static str,
    value: &str,
) -> Result<(), ConfigError> {
    if value.is_empty() {
        Err(ConfigError::Empty { section, field })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let warnings = validate(&Config::default()).unwrap();
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let mut config = Config::default();
        config.hot_pages.promotion_threshold = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn sub_one_spike_ratio_is_rejected() {
        let mut config = Config::default();
        config.spike.ratio_min = 0.5;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::SpikeRatioBelowOne(_))
        ));
    }

    #[test]
    fn oversized_tracked_set_warns_then_errors() {
        let mut config = Config::default();
        config.hot_pages.max_tracked = 20_000;
        let warnings = validate(&config).unwrap();
        assert_eq!(warnings.len(), 1);

        config.hot_pages.max_tracked = 200_000;
        assert!(validate(&config).is_err());
    }
}
