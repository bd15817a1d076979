//! Spike detection: a five-minute edit rate compared against an hourly
//! baseline, with cooldown-based de-duplication.

use crate::error::Result;
use crate::store::{Store, keys};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use wikipulse_config::{AlertsConfig, SpikeConfig};
use wikipulse_model::{Edit, FeedMessage, SpikeAlert, SpikeSeverity};

/// TTL of the short-rate counter.
const SHORT_WINDOW: Duration = Duration::from_secs(300);

/// TTL of the baseline counter.
const BASELINE_WINDOW: Duration = Duration::from_secs(3600);

/// Short window to hourly projection factor (60 / 5 minutes).
const PROJECTION: u64 = 12;

/// Counters exported by the spike detector.
#[derive(Debug, Default)]
pub struct SpikeCounters {
    /// Alerts emitted.
    pub emitted: AtomicU64,
    /// Qualifying spikes suppressed by an active cooldown.
    pub suppressed: AtomicU64,
}

/// Detects traffic spikes on hot pages.
pub struct SpikeDetector {
    store: Arc<dyn Store>,
    config: SpikeConfig,
    alerts: AlertsConfig,
    /// Exported counters.
    pub counters: SpikeCounters,
}

impl std::fmt::Debug for SpikeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpikeDetector")
            .field("config", &self.config)
            .finish()
    }
}

impl SpikeDetector {
    pub fn new(store: Arc<dyn Store>, config: SpikeConfig, alerts: AlertsConfig) -> Self {
        Self {
            store,
            config,
            alerts,
            counters: SpikeCounters::default(),
        }
    }

    /// Process one edit. Returns the alert if one was emitted.
    ///
    /// Non-hot pages are ignored so the per-edit work stays bounded.
    /// After an emission the page is silenced for the cooldown window.
    pub async fn handle(&self, edit: &Edit) -> Result<Option<SpikeAlert>> {
        if !self.store.exists(&keys::hot(&edit.title)).await? {
            return Ok(None);
        }

        let edits_5min = self
            .store
            .incr_with_ttl(&keys::rate_5m(&edit.title), SHORT_WINDOW)
            .await?;
        let edits_1h = self
            .store
            .incr_with_ttl(&keys::rate_1h(&edit.title), BASELINE_WINDOW)
            .await?;

        // The short window projects to an hourly rate. A cold baseline
        // is floored at the short count so the ratio stays finite.
        let baseline = edits_1h.max(edits_5min);
        let ratio = (edits_5min * PROJECTION) as f64 / baseline as f64;

        if edits_5min < self.config.min_edits || ratio < self.config.ratio_min {
            return Ok(None);
        }

        let fresh = self
            .store
            .put_string_nx(
                &keys::spike_cooldown(&edit.title),
                &edit.timestamp.to_string(),
                self.config.cooldown(),
            )
            .await?;
        if !fresh {
            self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
            debug!("spike on {} suppressed by cooldown", edit.title);
            return Ok(None);
        }

        let alert = SpikeAlert {
            page_title: edit.title.clone(),
            spike_ratio: ratio,
            edits_5min,
            baseline_rate: edits_1h,
            severity: SpikeSeverity::from_ratio(ratio),
            timestamp: edit.timestamp,
        };

        self.store
            .list_push_capped(
                keys::ALERTS_SPIKE,
                &serde_json::to_string(&alert)?,
                self.alerts.keep,
                self.alerts.ttl(),
            )
            .await?;
        self.store
            .publish(
                keys::CHANNEL_ALERTS,
                &serde_json::to_string(&FeedMessage::Spike(alert.clone()))?,
            )
            .await?;

        self.counters.emitted.fetch_add(1, Ordering::Relaxed);
        info!(
            "spike alert: {} at {:.1}x baseline ({} edits/5min, severity {})",
            alert.page_title, alert.spike_ratio, alert.edits_5min, alert.severity
        );
        Ok(Some(alert))
    }
}
