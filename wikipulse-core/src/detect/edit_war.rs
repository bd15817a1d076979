//! Edit-war detection: revert and interleave analysis over a hot
//! page's recent-edits ring.

use crate::error::Result;
use crate::store::{Store, keys};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};
use wikipulse_config::{AlertsConfig, EditWarConfig, HotPagesConfig};
use wikipulse_model::{Edit, EditSummary, EditWarAlert, FeedMessage, WarSeverity};

/// What the ring analysis found for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingAnalysis {
    /// Distinct editors in the ring.
    pub editor_count: u32,
    /// Entries classified as reverts.
    pub revert_count: u32,
    /// Total entries analyzed.
    pub edit_count: u32,
    /// Adjacent pairs with differing editors.
    pub interleave: u32,
    /// Oldest entry's timestamp.
    pub start_time: i64,
    /// Newest minus oldest timestamp, seconds.
    pub span_secs: i64,
}

/// Analyze a ring, oldest entry last (list head is newest).
///
/// An entry counts as a revert if it was flagged at append time (the
/// comment heuristic) or its new revision is lower than a revision
/// already seen, which is what an undo looks like in the stream.
pub fn analyze_ring(newest_first: &[EditSummary]) -> Option<RingAnalysis> {
    if newest_first.is_empty() {
        return None;
    }

    let oldest_first: Vec<&EditSummary> = newest_first.iter().rev().collect();

    let mut editors: HashSet<&str> = HashSet::new();
    let mut revert_count = 0u32;
    let mut interleave = 0u32;
    let mut max_revision = 0u64;

    for (i, entry) in oldest_first.iter().enumerate() {
        editors.insert(entry.user.as_str());

        let revision_drop = entry.revision_new != 0 && entry.revision_new < max_revision;
        if entry.is_revert || revision_drop {
            revert_count += 1;
        }
        max_revision = max_revision.max(entry.revision_new);

        if i > 0 && oldest_first[i - 1].user != entry.user {
            interleave += 1;
        }
    }

    let start_time = oldest_first.first().map(|e| e.timestamp).unwrap_or(0);
    let end_time = oldest_first.last().map(|e| e.timestamp).unwrap_or(0);

    Some(RingAnalysis {
        editor_count: editors.len() as u32,
        revert_count,
        edit_count: oldest_first.len() as u32,
        interleave,
        start_time,
        span_secs: end_time - start_time,
    })
}

/// Counters exported by the edit-war detector.
#[derive(Debug, Default)]
pub struct WarCounters {
    /// Alerts emitted (first emissions).
    pub emitted: AtomicU64,
    /// In-place updates of an alert under cooldown.
    pub updated: AtomicU64,
    /// Classifications suppressed by an active cooldown.
    pub suppressed: AtomicU64,
}

/// Detects edit wars on hot pages.
pub struct EditWarDetector {
    store: Arc<dyn Store>,
    config: EditWarConfig,
    hot_pages: HotPagesConfig,
    alerts: AlertsConfig,
    /// Exported counters.
    pub counters: WarCounters,
}

impl std::fmt::Debug for EditWarDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditWarDetector")
            .field("config", &self.config)
            .finish()
    }
}

impl EditWarDetector {
    pub fn new(
        store: Arc<dyn Store>,
        config: EditWarConfig,
        hot_pages: HotPagesConfig,
        alerts: AlertsConfig,
    ) -> Self {
        Self {
            store,
            config,
            hot_pages,
            alerts,
            counters: WarCounters::default(),
        }
    }

    /// Process one edit. Returns the alert if one was emitted or
    /// updated in place.
    pub async fn handle(&self, edit: &Edit) -> Result<Option<EditWarAlert>> {
        if !self.store.exists(&keys::hot(&edit.title)).await? {
            return Ok(None);
        }

        let ring = self.load_ring(&edit.title).await?;
        let Some(analysis) = analyze_ring(&ring) else {
            return Ok(None);
        };

        if !self.is_war(&analysis) {
            return Ok(None);
        }

        let alert = EditWarAlert {
            page_title: edit.title.clone(),
            editor_count: analysis.editor_count,
            revert_count: analysis.revert_count,
            edit_count: analysis.edit_count,
            start_time: analysis.start_time,
            severity: WarSeverity::classify(analysis.revert_count, analysis.editor_count),
        };

        let cooldown_key = keys::war_cooldown(&edit.title);
        match self.store.get_string(&cooldown_key).await? {
            None => {
                self.publish_alert(&alert, None).await?;
                self.counters.emitted.fetch_add(1, Ordering::Relaxed);
                info!(
                    "edit war: {} ({} editors, {} reverts, severity {})",
                    alert.page_title, alert.editor_count, alert.revert_count, alert.severity
                );
                Ok(Some(alert))
            }
            Some(previous_json) => {
                let previous: Option<EditWarAlert> = serde_json::from_str(&previous_json).ok();
                if self.should_update(previous.as_ref(), &alert) {
                    self.publish_alert(&alert, Some(&previous_json)).await?;
                    self.counters.updated.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "edit war on {} updated: {} reverts, severity {}",
                        alert.page_title, alert.revert_count, alert.severity
                    );
                    Ok(Some(alert))
                } else {
                    self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
                    Ok(None)
                }
            }
        }
    }

    fn is_war(&self, analysis: &RingAnalysis) -> bool {
        analysis.editor_count >= self.config.min_editors
            && analysis.revert_count >= self.config.min_reverts
            && analysis.interleave >= self.config.min_interleave
            && analysis.span_secs <= self.hot_pages.window_secs as i64
    }

    /// An alert under cooldown is re-published when the war visibly
    /// grew: enough new reverts, or an escalated severity.
    fn should_update(&self, previous: Option<&EditWarAlert>, current: &EditWarAlert) -> bool {
        match previous {
            Some(previous) => {
                current.revert_count >= previous.revert_count + self.config.update_delta
                    || current.severity > previous.severity
            }
            // Unreadable cooldown payload: replace it.
            None => true,
        }
    }

    async fn load_ring(&self, title: &str) -> Result<Vec<EditSummary>> {
        let raw = self.store.list_range(&keys::recent(title), 0, -1).await?;
        let mut ring = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str(&entry) {
                Ok(summary) => ring.push(summary),
                Err(e) => warn!("skipping malformed ring entry on {}: {}", title, e),
            }
        }
        Ok(ring)
    }

    /// Write the cooldown marker and alert list entry, replacing the
    /// previous list entry on an in-place update.
    async fn publish_alert(&self, alert: &EditWarAlert, replaces: Option<&str>) -> Result<()> {
        let json = serde_json::to_string(alert)?;

        self.store
            .put_string(
                &keys::war_cooldown(&alert.page_title),
                &json,
                self.config.cooldown(),
            )
            .await?;

        if let Some(previous_json) = replaces {
            self.store
                .list_remove(keys::ALERTS_WAR, previous_json)
                .await?;
        }
        self.store
            .list_push_capped(keys::ALERTS_WAR, &json, self.alerts.keep, self.alerts.ttl())
            .await?;

        self.store
            .publish(
                keys::CHANNEL_ALERTS,
                &serde_json::to_string(&FeedMessage::EditWar(alert.clone()))?,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hot::HotPageTracker;
    use crate::store::MemoryStore;
    use wikipulse_model::EditKind;

    fn edit(title: &str, user: &str, ts: i64, rev: u64, comment: &str) -> Edit {
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
            length_new: 90,
            revision_old: rev.saturating_sub(1),
            revision_new: rev,
            comment: comment.to_string(),
        }
    }

    fn summary(user: &str, ts: i64, rev: u64, is_revert: bool) -> EditSummary {
        EditSummary {
            user: user.to_string(),
            timestamp: ts,
            revision_old: rev.saturating_sub(1),
            revision_new: rev,
            is_revert,
        }
    }

    #[test]
    fn analysis_counts_editors_reverts_and_interleave() {
        // Newest first, as read from the list head.
        let ring = vec![
            summary("c", 104, 15, true),
            summary("a", 103, 14, false),
            summary("b", 102, 13, true),
            summary("a", 101, 12, false),
            summary("a", 100, 11, false),
        ];
        let analysis = analyze_ring(&ring).unwrap();
        assert_eq!(analysis.editor_count, 3);
        assert_eq!(analysis.revert_count, 2);
        assert_eq!(analysis.edit_count, 5);
        // a->a, a->b, b->a, a->c
        assert_eq!(analysis.interleave, 3);
        assert_eq!(analysis.start_time, 100);
        assert_eq!(analysis.span_secs, 4);
    }

    #[test]
    fn revision_drop_counts_as_revert() {
        // Third entry restores revision 10 after 12 was seen.
        let ring = vec![
            summary("c", 103, 10, false),
            summary("b", 102, 12, false),
            summary("a", 101, 11, false),
        ];
        let analysis = analyze_ring(&ring).unwrap();
        assert_eq!(analysis.revert_count, 1);
    }

    #[test]
    fn empty_ring_has_no_analysis() {
        assert!(analyze_ring(&[]).is_none());
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        tracker: HotPageTracker,
        detector: EditWarDetector,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let hot_pages = HotPagesConfig::default();
        Fixture {
            store: store.clone(),
            tracker: HotPageTracker::new(store.clone(), hot_pages.clone()),
            detector: EditWarDetector::new(
                store,
                EditWarConfig::default(),
                hot_pages,
                AlertsConfig::default(),
            ),
        }
    }

    /// Drive an edit through the tracker (ring writer) then the
    /// detector, the way the two consumers see it in production.
    async fn feed(f: &Fixture, e: &Edit) -> Option<EditWarAlert> {
        f.tracker.process(e).await.unwrap();
        f.detector.handle(e).await.unwrap()
    }

    #[tokio::test]
    async fn alternating_reverters_classify_once_as_medium() {
        let f = fixture();
        let users = ["U1", "U2", "U3"];

        let mut alerts = Vec::new();
        for i in 0..10u64 {
            let e = edit(
                "Y",
                users[i as usize % 3],
                1000 + i as i64 * 10,
                10 + i,
                "revert",
            );
            if let Some(alert) = feed(&f, &e).await {
                alerts.push(alert);
            }
        }

        // One first emission; later qualifying edits only update it.
        assert_eq!(f.detector.counters.emitted.load(Ordering::Relaxed), 1);
        let first = &alerts[0];
        assert_eq!(first.editor_count, 3);
        assert!(first.revert_count >= 3);
        assert_eq!(first.severity, WarSeverity::Medium);

        // The alert list holds exactly one entry for the page.
        let list = f.store.list_range(keys::ALERTS_WAR, 0, -1).await.unwrap();
        assert_eq!(list.len(), 1);
    }

    #[tokio::test]
    async fn growing_war_escalates_to_critical_in_place() {
        let f = fixture();
        let users = ["U1", "U2", "U3"];

        let mut last = None;
        for i in 0..11u64 {
            let e = edit(
                "Y",
                users[i as usize % 3],
                1000 + i as i64 * 10,
                10 + i,
                "revert",
            );
            if let Some(alert) = feed(&f, &e).await {
                last = Some(alert);
            }
        }

        // Eight or more reverts in the ring escalate the updated alert.
        let last = last.unwrap();
        assert!(last.revert_count >= 8);
        assert_eq!(last.severity, WarSeverity::Critical);
        assert!(f.detector.counters.updated.load(Ordering::Relaxed) >= 1);

        // Still a single list entry: updates replace, never append.
        let list = f.store.list_range(keys::ALERTS_WAR, 0, -1).await.unwrap();
        assert_eq!(list.len(), 1);
        let stored: EditWarAlert = serde_json::from_str(&list[0]).unwrap();
        assert_eq!(stored.severity, WarSeverity::Critical);
    }

    #[tokio::test]
    async fn single_editor_churn_is_not_a_war() {
        let f = fixture();
        for i in 0..10u64 {
            let e = edit("Z", "OnlyUser", 1000 + i as i64, 10 + i, "revert");
            assert!(feed(&f, &e).await.is_none());
        }
    }

    #[tokio::test]
    async fn slow_war_outside_window_is_ignored() {
        let f = fixture();
        let users = ["U1", "U2", "U3"];
        // Ten reverts spread over two hours exceed the 15-minute window.
        for i in 0..10u64 {
            let e = edit(
                "W",
                users[i as usize % 3],
                1000 + i as i64 * 720,
                10 + i,
                "revert",
            );
            assert!(feed(&f, &e).await.is_none());
        }
    }

    #[tokio::test]
    async fn non_hot_page_is_ignored() {
        let f = fixture();
        // Single edit: page is below the promotion threshold.
        let e = edit("Cold", "U1", 1000, 10, "revert");
        f.tracker.process(&e).await.unwrap();
        assert!(f.detector.handle(&e).await.unwrap().is_none());
    }
}
