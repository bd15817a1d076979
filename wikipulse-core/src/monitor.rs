//! Resource monitoring: periodic capacity probes that trip per-feature
//! circuit breakers when the system runs hot.
//!
//! Flags live in a context object passed to the detector runtimes, not
//! in process-global state, so tests can build isolated instances.

use crate::store::Store;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wikipulse_config::MonitorConfig;

/// A breached probe recovers once its value falls back to this fraction
/// of the threshold, so a value hovering at the line does not flap.
const RECOVERY_FRACTION: f64 = 0.9;

/// Features the monitor can switch off under load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Hot-page tracking (promotion and per-page state).
    HotTracker,
    /// Spike detection.
    SpikeDetector,
    /// Edit-war detection.
    WarDetector,
    /// Trending score updates.
    TrendingScorer,
}

impl Feature {
    /// Stable label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HotTracker => "hot_tracker",
            Self::SpikeDetector => "spike_detector",
            Self::WarDetector => "war_detector",
            Self::TrendingScorer => "trending_scorer",
        }
    }
}

/// Shared feature-flag context. Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct FeatureFlags {
    disabled: Arc<DashMap<Feature, ()>>,
}

impl fmt::Debug for FeatureFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureFlags")
            .field("disabled", &self.disabled.len())
            .finish()
    }
}

impl FeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a feature should currently do work.
    pub fn enabled(&self, feature: Feature) -> bool {
        !self.disabled.contains_key(&feature)
    }

    /// Enable or disable a feature.
    pub fn set(&self, feature: Feature, enabled: bool) {
        if enabled {
            self.disabled.remove(&feature);
        } else {
            self.disabled.insert(feature, ());
        }
    }
}

/// Where a watch reads its value from.
pub enum ProbeSource {
    /// Used-memory percentage of the shared store.
    StoreMemory(Arc<dyn Store>),
    /// An in-process gauge, e.g. consumer lag.
    Gauge(Arc<AtomicU64>),
}

impl fmt::Debug for ProbeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StoreMemory(_) => f.write_str("StoreMemory"),
            Self::Gauge(_) => f.write_str("Gauge"),
        }
    }
}

/// One monitored signal and the feature it protects.
#[derive(Debug)]
pub struct Watch {
    /// Signal name for logs.
    pub name: &'static str,
    /// Value source.
    pub source: ProbeSource,
    /// Breach threshold; a value above this trips the breaker.
    pub threshold: f64,
    /// Feature disabled while breached.
    pub feature: Feature,
}

/// Callback invoked when a feature is disabled (`false`) or re-enabled
/// (`true`) by the monitor.
pub type FlagHook = Arc<dyn Fn(Feature, bool) + Send + Sync>;

/// Periodically evaluates watches and toggles feature flags.
pub struct ResourceMonitor {
    flags: FeatureFlags,
    watches: Vec<Watch>,
    config: MonitorConfig,
    hook: Option<FlagHook>,
    breached: Mutex<HashSet<&'static str>>,
}

impl fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceMonitor")
            .field("watches", &self.watches.len())
            .field("breached", &self.breached.lock().len())
            .finish()
    }
}

impl ResourceMonitor {
    pub fn new(flags: FeatureFlags, watches: Vec<Watch>, config: MonitorConfig) -> Self {
        Self {
            flags,
            watches,
            config,
            hook: None,
            breached: Mutex::new(HashSet::new()),
        }
    }

    /// Standard watch set: store memory guards the hot tracker, lag
    /// guards the edit-war detector (the most expensive consumer).
    pub fn standard_watches(
        store: Arc<dyn Store>,
        lag: Arc<AtomicU64>,
        config: &MonitorConfig,
    ) -> Vec<Watch> {
        vec![
            Watch {
                name: "redis_used_memory_pct",
                source: ProbeSource::StoreMemory(store),
                threshold: config.memory_pct_max,
                feature: Feature::HotTracker,
            },
            Watch {
                name: "consumer_lag",
                source: ProbeSource::Gauge(lag),
                threshold: config.lag_max as f64,
                feature: Feature::WarDetector,
            },
        ]
    }

    /// Register a callback observing flag transitions.
    pub fn with_hook(mut self, hook: FlagHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Evaluate every watch once.
    pub async fn probe_once(&self) {
        for watch in &self.watches {
            let value = match &watch.source {
                ProbeSource::StoreMemory(store) => match store.used_memory_pct().await {
                    Ok(Some(pct)) => pct,
                    Ok(None) => continue,
                    Err(e) => {
                        debug!("probe {} failed: {}", watch.name, e);
                        continue;
                    }
                },
                ProbeSource::Gauge(gauge) => gauge.load(Ordering::Relaxed) as f64,
            };

            let currently_breached = self.breached.lock().contains(watch.name);
            if !currently_breached && value > watch.threshold {
                self.breached.lock().insert(watch.name);
                warn!(
                    "{} at {:.1} exceeds {:.1}; disabling {}",
                    watch.name,
                    value,
                    watch.threshold,
                    watch.feature.as_str()
                );
                self.flags.set(watch.feature, false);
                if let Some(hook) = &self.hook {
                    hook(watch.feature, false);
                }
            } else if currently_breached && value <= watch.threshold * RECOVERY_FRACTION {
                self.breached.lock().remove(watch.name);
                info!(
                    "{} recovered at {:.1}; re-enabling {}",
                    watch.name,
                    value,
                    watch.feature.as_str()
                );
                self.flags.set(watch.feature, true);
                if let Some(hook) = &self.hook {
                    hook(watch.feature, true);
                }
            }
        }
    }

    /// Run the probe loop until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.probe_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("resource monitor stopped");
                    return;
                }
                _ = ticker.tick() => self.probe_once().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gauge_monitor(lag: Arc<AtomicU64>, flags: FeatureFlags) -> ResourceMonitor {
        let watches = vec![Watch {
            name: "consumer_lag",
            source: ProbeSource::Gauge(lag),
            threshold: 1000.0,
            feature: Feature::WarDetector,
        }];
        ResourceMonitor::new(flags, watches, MonitorConfig::default())
    }

    #[tokio::test]
    async fn breach_disables_and_recovery_reenables() {
        let lag = Arc::new(AtomicU64::new(0));
        let flags = FeatureFlags::new();
        let monitor = gauge_monitor(lag.clone(), flags.clone());

        monitor.probe_once().await;
        assert!(flags.enabled(Feature::WarDetector));

        lag.store(1500, Ordering::Relaxed);
        monitor.probe_once().await;
        assert!(!flags.enabled(Feature::WarDetector));

        // Just under the threshold is not enough to recover.
        lag.store(950, Ordering::Relaxed);
        monitor.probe_once().await;
        assert!(!flags.enabled(Feature::WarDetector));

        lag.store(800, Ordering::Relaxed);
        monitor.probe_once().await;
        assert!(flags.enabled(Feature::WarDetector));
    }

    #[tokio::test]
    async fn hook_observes_transitions() {
        let lag = Arc::new(AtomicU64::new(0));
        let flags = FeatureFlags::new();
        let seen: Arc<Mutex<Vec<(Feature, bool)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_hook = seen.clone();
        let monitor = gauge_monitor(lag.clone(), flags.clone())
            .with_hook(Arc::new(move |feature, enabled| {
                seen_hook.lock().push((feature, enabled));
            }));

        lag.store(2000, Ordering::Relaxed);
        monitor.probe_once().await;
        // A sustained breach fires the hook once, not every probe.
        monitor.probe_once().await;
        lag.store(0, Ordering::Relaxed);
        monitor.probe_once().await;

        let seen = seen.lock();
        assert_eq!(
            *seen,
            vec![(Feature::WarDetector, false), (Feature::WarDetector, true)]
        );
    }

    #[test]
    fn flags_default_enabled() {
        let flags = FeatureFlags::new();
        assert!(flags.enabled(Feature::HotTracker));
        flags.set(Feature::HotTracker, false);
        assert!(!flags.enabled(Feature::HotTracker));
        flags.set(Feature::HotTracker, true);
        assert!(flags.enabled(Feature::HotTracker));
    }
}
