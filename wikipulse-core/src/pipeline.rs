//! Detector runtimes: the per-consumer loop gluing a log consumer to a
//! detector, with feature gating, bounded retries and panic recovery.

use crate::detect::{EditWarDetector, SpikeDetector};
use crate::error::Result;
use crate::hot::HotPageTracker;
use crate::log::EditConsumer;
use crate::monitor::{Feature, FeatureFlags};
use crate::trending::TrendingScorer;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use wikipulse_model::Edit;

/// Attempts per edit before it is skipped.
const MAX_ATTEMPTS: u32 = 3;

/// Pause between retry attempts.
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Pause after a consumer error before polling again.
const CONSUMER_ERROR_DELAY: Duration = Duration::from_secs(1);

/// A detector's edit-processing entry point.
#[async_trait]
pub trait EditHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Feature flag gating this handler.
    fn feature(&self) -> Feature;

    /// Process one edit. Must be idempotent under redelivery.
    async fn handle_edit(&self, edit: &Edit) -> Result<()>;
}

#[async_trait]
impl EditHandler for HotPageTracker {
    fn name(&self) -> &'static str {
        "hot_tracker"
    }

    fn feature(&self) -> Feature {
        Feature::HotTracker
    }

    async fn handle_edit(&self, edit: &Edit) -> Result<()> {
        self.process(edit).await
    }
}

#[async_trait]
impl EditHandler for SpikeDetector {
    fn name(&self) -> &'static str {
        "spike_detector"
    }

    fn feature(&self) -> Feature {
        Feature::SpikeDetector
    }

    async fn handle_edit(&self, edit: &Edit) -> Result<()> {
        self.handle(edit).await.map(|_| ())
    }
}

#[async_trait]
impl EditHandler for EditWarDetector {
    fn name(&self) -> &'static str {
        "war_detector"
    }

    fn feature(&self) -> Feature {
        Feature::WarDetector
    }

    async fn handle_edit(&self, edit: &Edit) -> Result<()> {
        self.handle(edit).await.map(|_| ())
    }
}

#[async_trait]
impl EditHandler for TrendingScorer {
    fn name(&self) -> &'static str {
        "trending_scorer"
    }

    fn feature(&self) -> Feature {
        Feature::TrendingScorer
    }

    async fn handle_edit(&self, edit: &Edit) -> Result<()> {
        self.handle(edit).await
    }
}

/// What became of one dispatched edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handled, possibly after retries.
    Handled,
    /// Skipped after exhausting retries or a panic.
    Skipped,
    /// Feature disabled; the edit was read and ignored.
    Disabled,
}

/// Run one edit through a handler with the runtime's protections:
/// feature gate, bounded retries on transient errors, panic recovery.
pub async fn dispatch(handler: &dyn EditHandler, flags: &FeatureFlags, edit: &Edit) -> Dispatch {
    if !flags.enabled(handler.feature()) {
        return Dispatch::Disabled;
    }

    for attempt in 1..=MAX_ATTEMPTS {
        match AssertUnwindSafe(handler.handle_edit(edit)).catch_unwind().await {
            Ok(Ok(())) => return Dispatch::Handled,
            Ok(Err(e)) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                warn!(
                    "{}: attempt {}/{} failed on {}: {}",
                    handler.name(),
                    attempt,
                    MAX_ATTEMPTS,
                    edit.title,
                    e
                );
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Ok(Err(e)) => {
                warn!(
                    "{}: giving up on edit {} ({}): {}",
                    handler.name(),
                    edit.id,
                    edit.title,
                    e
                );
                return Dispatch::Skipped;
            }
            Err(_) => {
                error!(
                    "{}: panicked on edit {} ({}); skipping",
                    handler.name(),
                    edit.id,
                    edit.title
                );
                return Dispatch::Skipped;
            }
        }
    }
    Dispatch::Skipped
}

/// One detector's main loop: a consumer-group member feeding a handler.
pub struct DetectorRuntime {
    consumer: EditConsumer,
    handler: Arc<dyn EditHandler>,
    flags: FeatureFlags,
}

impl std::fmt::Debug for DetectorRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorRuntime")
            .field("handler", &self.handler.name())
            .finish()
    }
}

impl DetectorRuntime {
    pub fn new(consumer: EditConsumer, handler: Arc<dyn EditHandler>, flags: FeatureFlags) -> Self {
        Self {
            consumer,
            handler,
            flags,
        }
    }

    /// Consume edits until cancelled, then leave the group.
    pub async fn run(self, cancel: CancellationToken) {
        info!("{} runtime started", self.handler.name());

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.consumer.next_edit() => received,
            };

            match received {
                Ok(Some(edit)) => {
                    dispatch(self.handler.as_ref(), &self.flags, &edit).await;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("{}: consumer error: {}", self.handler.name(), e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(CONSUMER_ERROR_DELAY) => {}
                    }
                }
            }
        }

        self.consumer.close();
        info!("{} runtime stopped", self.handler.name());
    }
}
