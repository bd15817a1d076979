//! Hot-page tracking: promotion, activity windows, editor sets and the
//! recent-edits ring.
//!
//! Memory stays bounded by only tracking pages that cross the promotion
//! threshold, capping the tracked set, and letting every per-page key
//! carry the activity-window TTL so idle pages age out on their own.

use crate::error::Result;
use crate::store::{Store, keys};
use chrono::DateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wikipulse_config::HotPagesConfig;
use wikipulse_model::{Edit, EditSummary};

/// TTL on per-language daily stat hashes.
const LANGUAGE_STATS_TTL: Duration = Duration::from_secs(48 * 3600);

/// Edit summaries matching any of these are flagged as reverts at
/// append time; the edit-war detector adds revision-based evidence.
static REVERT_COMMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(revert(ed|ing)?|rv[v]?|undid|undo|rollback)\b")
        .expect("revert pattern must compile")
});

/// Whether an edit summary reads like a revert.
pub fn comment_is_revert(comment: &str) -> bool {
    REVERT_COMMENT.is_match(comment)
}

/// Counters exported by the tracker for health reporting.
#[derive(Debug, Default)]
pub struct TrackerCounters {
    /// Pages promoted to hot.
    pub promoted: AtomicU64,
    /// Promotions refused because the tracked set was full.
    pub promotion_refused: AtomicU64,
    /// Hot pages removed by the eviction sweep.
    pub evicted: AtomicU64,
}

/// Tracks which pages are hot and owns their per-page state.
pub struct HotPageTracker {
    store: Arc<dyn Store>,
    config: HotPagesConfig,
    sweep_in_flight: AtomicBool,
    /// Exported counters.
    pub counters: TrackerCounters,
}

impl std::fmt::Debug for HotPageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotPageTracker")
            .field("config", &self.config)
            .finish()
    }
}

impl HotPageTracker {
    pub fn new(store: Arc<dyn Store>, config: HotPagesConfig) -> Self {
        Self {
            store,
            config,
            sweep_in_flight: AtomicBool::new(false),
            counters: TrackerCounters::default(),
        }
    }

    /// Process one edit: bump the activity window, promote the page if
    /// it crossed the threshold, and maintain per-page state for hot
    /// pages.
    pub async fn process(&self, edit: &Edit) -> Result<()> {
        let window = self.config.window();
        let count = self
            .store
            .incr_with_ttl(&keys::activity(&edit.title), window)
            .await?;

        self.record_language(edit).await?;

        let hot = self.is_hot(&edit.title).await?;
        if !hot {
            if count < self.config.promotion_threshold {
                return Ok(());
            }
            if !self.try_promote(edit).await? {
                return Ok(());
            }
        }

        self.record_editor(&edit.title, &edit.user).await?;
        self.append_edit(&edit.title, summarize(edit)).await?;
        Ok(())
    }

    /// Whether a page is currently tracked as hot.
    pub async fn is_hot(&self, title: &str) -> Result<bool> {
        self.store.exists(&keys::hot(title)).await
    }

    /// Current activity count for a page (0 once the window lapses).
    pub async fn activity(&self, title: &str) -> Result<u64> {
        self.store.counter(&keys::activity(title)).await
    }

    /// Add an editor to the page's bounded editor set. Returns false
    /// when the set is full and the editor was refused.
    pub async fn record_editor(&self, title: &str, user: &str) -> Result<bool> {
        let added = self
            .store
            .set_add_capped(
                &keys::editors(title),
                user,
                self.config.max_members_per_page,
                self.config.window(),
            )
            .await?;
        if !added {
            debug!("editor set for {} full, refusing {}", title, user);
        }
        Ok(added)
    }

    /// Push an edit summary onto the page's recent-edits ring.
    pub async fn append_edit(&self, title: &str, summary: EditSummary) -> Result<()> {
        let json = serde_json::to_string(&summary)?;
        self.store
            .list_push_capped(
                &keys::recent(title),
                &json,
                self.config.window_capacity,
                self.config.window(),
            )
            .await
    }

    /// Promote a page unless the tracked set is at capacity.
    ///
    /// The circuit breaker fails closed: at `max_tracked` no new page is
    /// promoted until the eviction sweep frees a slot.
    async fn try_promote(&self, edit: &Edit) -> Result<bool> {
        let tracked = self.store.zset_card(keys::HOT_SET).await?;
        if tracked >= self.config.max_tracked {
            self.counters.promotion_refused.fetch_add(1, Ordering::Relaxed);
            debug!(
                "tracked set full ({}/{}), not promoting {}",
                tracked, self.config.max_tracked, edit.title
            );
            return Ok(false);
        }

        let promoted_at = edit.timestamp;
        let meta = vec![
            ("title".to_string(), edit.title.clone()),
            ("promoted_at".to_string(), promoted_at.to_string()),
            ("language".to_string(), edit.language().to_string()),
        ];
        self.store
            .hash_set_all(&keys::hot(&edit.title), &meta, self.config.window())
            .await?;
        self.store
            .zset_add(keys::HOT_SET, &edit.title, promoted_at as f64)
            .await?;

        self.counters.promoted.fetch_add(1, Ordering::Relaxed);
        info!("promoted hot page: {} ({} tracked)", edit.title, tracked + 1);
        Ok(true)
    }

    async fn record_language(&self, edit: &Edit) -> Result<()> {
        let date = DateTime::from_timestamp(edit.timestamp, 0)
            .unwrap_or_default()
            .format("%Y-%m-%d")
            .to_string();
        self.store
            .hash_incr_with_ttl(
                &keys::language_stats(&date),
                edit.language(),
                1,
                LANGUAGE_STATS_TTL,
            )
            .await?;
        Ok(())
    }

    /// Remove hot pages whose activity window has expired.
    ///
    /// At most one sweep runs at a time per process; a sweep that finds
    /// another in flight returns immediately.
    pub async fn sweep_once(&self) -> Result<u64> {
        if self
            .sweep_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("eviction sweep already in flight, skipping");
            return Ok(0);
        }

        let result = self.sweep_inner().await;
        self.sweep_in_flight.store(false, Ordering::Release);
        result
    }

    async fn sweep_inner(&self) -> Result<u64> {
        let tracked = self.store.zset_range(keys::HOT_SET, 0, -1).await?;
        let mut evicted = 0u64;

        for (title, _promoted_at) in tracked {
            if self.store.exists(&keys::activity(&title)).await? {
                continue;
            }
            self.store.zset_remove(keys::HOT_SET, &title).await?;
            self.store.delete(&keys::hot(&title)).await?;
            self.store.delete(&keys::editors(&title)).await?;
            self.store.delete(&keys::recent(&title)).await?;
            evicted += 1;
            debug!("evicted idle hot page: {}", title);
        }

        if evicted > 0 {
            self.counters.evicted.fetch_add(evicted, Ordering::Relaxed);
            info!("eviction sweep removed {} idle hot pages", evicted);
        }
        Ok(evicted)
    }

    /// Run the periodic eviction sweep until cancelled.
    pub async fn run_eviction(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.cleanup_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("eviction sweep stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!("eviction sweep failed: {}", e);
                    }
                }
            }
        }
    }
}

/// Build the ring entry for an edit, applying the comment-based revert
/// heuristic. Revision-based revert evidence is applied by the edit-war
/// detector, which sees the whole ring.
pub fn summarize(edit: &Edit) -> EditSummary {
    EditSummary {
        user: edit.user.clone(),
        timestamp: edit.timestamp,
        revision_old: edit.revision_old,
        revision_new: edit.revision_new,
        is_revert: comment_is_revert(&edit.comment),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use wikipulse_model::EditKind;

    fn config() -> HotPagesConfig {
        HotPagesConfig {
            max_tracked: 3,
            promotion_threshold: 3,
            window_secs: 900,
            max_members_per_page: 2,
            window_capacity: 4,
            cleanup_interval_secs: 60,
        }
    }

    fn edit(title: &str, user: &str, ts: i64) -> Edit {
        Edit {
            id: 1,
            kind: EditKind::Edit,
            title: title.to_string(),
            user: user.to_string(),
            bot: false,
            wiki: "enwiki".to_string(),
            server_url: String::new(),
            timestamp: ts,
            length_old: 100,
            length_new: 150,
            revision_old: 1,
            revision_new: 2,
            comment: String::new(),
        }
    }

    fn tracker(store: Arc<MemoryStore>) -> HotPageTracker {
        HotPageTracker::new(store, config())
    }

    #[tokio::test]
    async fn page_promotes_at_threshold() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(store.clone());

        tracker.process(&edit("X", "a", 1000)).await.unwrap();
        tracker.process(&edit("X", "b", 1001)).await.unwrap();
        assert!(!tracker.is_hot("X").await.unwrap());

        tracker.process(&edit("X", "c", 1002)).await.unwrap();
        assert!(tracker.is_hot("X").await.unwrap());
        assert_eq!(tracker.activity("X").await.unwrap(), 3);

        // Editor set and ring start only at promotion.
        assert_eq!(store.set_len("editors:X").await.unwrap(), 1);
        assert_eq!(store.list_range("recent:X", 0, -1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn promotion_fails_closed_at_max_tracked() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(store.clone());

        for page in ["A", "B", "C"] {
            for (i, user) in ["a", "b", "c"].iter().enumerate() {
                tracker.process(&edit(page, user, 1000 + i as i64)).await.unwrap();
            }
            assert!(tracker.is_hot(page).await.unwrap());
        }

        // The fourth candidate crosses the threshold but is refused.
        for (i, user) in ["a", "b", "c", "d"].iter().enumerate() {
            tracker.process(&edit("D", user, 2000 + i as i64)).await.unwrap();
        }
        assert!(!tracker.is_hot("D").await.unwrap());
        assert!(tracker.counters.promotion_refused.load(Ordering::Relaxed) >= 1);
        assert_eq!(store.zset_card(keys::HOT_SET).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn editor_set_respects_cap() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(store.clone());

        for (i, user) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            tracker.process(&edit("X", user, 1000 + i as i64)).await.unwrap();
        }
        // max_members_per_page = 2 in the test config.
        assert_eq!(store.set_len("editors:X").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn ring_is_trimmed_to_capacity() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(store.clone());

        for i in 0..10 {
            tracker.process(&edit("X", "a", 1000 + i)).await.unwrap();
        }
        let ring = store.list_range("recent:X", 0, -1).await.unwrap();
        assert_eq!(ring.len(), 4);
        // Newest first.
        let head: EditSummary = serde_json::from_str(&ring[0]).unwrap();
        assert_eq!(head.timestamp, 1009);
    }

    #[tokio::test]
    async fn sweep_evicts_expired_pages_and_frees_slots() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(store.clone());

        for (i, user) in ["a", "b", "c"].iter().enumerate() {
            tracker.process(&edit("X", user, 1000 + i as i64)).await.unwrap();
        }
        assert!(tracker.is_hot("X").await.unwrap());

        // Nothing to evict while the window is live.
        assert_eq!(tracker.sweep_once().await.unwrap(), 0);

        store.advance(Duration::from_secs(901));
        assert_eq!(tracker.sweep_once().await.unwrap(), 1);
        assert!(!tracker.is_hot("X").await.unwrap());
        assert_eq!(store.zset_card(keys::HOT_SET).await.unwrap(), 0);
        assert_eq!(store.set_len("editors:X").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_tolerated() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(store.clone());

        let e = edit("X", "a", 1000);
        for _ in 0..4 {
            tracker.process(&e).await.unwrap();
        }
        // Counter over-counts (4), but the editor set deduplicates.
        assert!(tracker.is_hot("X").await.unwrap());
        assert_eq!(store.set_len("editors:X").await.unwrap(), 1);
    }

    #[test]
    fn revert_comment_heuristic() {
        assert!(comment_is_revert("Reverted edits by Example"));
        assert!(comment_is_revert("rv vandalism"));
        assert!(comment_is_revert("Undid revision 123456"));
        assert!(comment_is_revert("rollback to last good version"));
        assert!(!comment_is_revert("fix typo in infobox"));
        assert!(!comment_is_revert("reverberation section added"));
    }
}
