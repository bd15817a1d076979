//! Integration tests for layered config loading.

use std::io::Write;
use wikipulse_config::Config;

#[test]
fn built_in_defaults() {
    let load = Config::load(None).unwrap();
    let config = load.config;

    assert_eq!(config.kafka.topic, "wikipedia.edits");
    assert_eq!(config.hot_pages.max_tracked, 500);
    assert_eq!(config.hot_pages.promotion_threshold, 3);
    assert_eq!(config.hot_pages.window_secs, 900);
    assert_eq!(config.hot_pages.max_members_per_page, 50);
    assert_eq!(config.hot_pages.window_capacity, 20);
    assert_eq!(config.spike.ratio_min, 2.0);
    assert_eq!(config.spike.min_edits, 10);
    assert_eq!(config.trending.max_pages, 200);
    assert_eq!(config.trending.half_life_minutes, 30);
    assert_eq!(config.alerts.keep, 100);
    assert_eq!(config.fanout.buffer_size, 256);
}

#[test]
fn partial_file_overrides_only_named_fields() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[hot_pages]
max_tracked = 100

[spike]
min_edits = 5

[ingest]
languages = ["en", "de"]
exclude_bots = true
"#
    )
    .unwrap();

    let load = Config::load(Some(file.path())).unwrap();
    let config = load.config;

    assert_eq!(config.hot_pages.max_tracked, 100);
    // Untouched fields keep their defaults.
    assert_eq!(config.hot_pages.promotion_threshold, 3);
    assert_eq!(config.spike.min_edits, 5);
    assert_eq!(config.spike.ratio_min, 2.0);
    assert_eq!(config.ingest.languages, vec!["en", "de"]);
    assert!(config.ingest.exclude_bots);
}

#[test]
fn missing_file_is_an_error() {
    let err = Config::load(Some(std::path::Path::new("/nonexistent/wikipulse.toml")));
    assert!(err.is_err());
}

#[test]
fn invalid_values_in_file_are_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[trending]
half_life_minutes = 0
"#
    )
    .unwrap();

    assert!(Config::load(Some(file.path())).is_err());
}
