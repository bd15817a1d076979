//! Trending leaderboard: time-decayed per-page scores over a sorted
//! set, pruned to a bounded size in the background.

use crate::error::Result;
use crate::store::{Store, keys};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wikipulse_config::TrendingConfig;
use wikipulse_model::{Edit, TrendingEntry};

/// TTL on per-page trending metadata; self-cleans entries the pruner
/// removed from the sorted set.
const META_TTL: Duration = Duration::from_secs(86_400);

/// TTL on the hourly edit counter backing `edits_1h`.
const HOUR_WINDOW: Duration = Duration::from_secs(3600);

/// Byte change at which the per-edit weight saturates.
const WEIGHT_SATURATION: f64 = 2000.0;

/// Exponential decay with the given half-life.
pub fn decay(score: f64, elapsed_secs: f64, half_life_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return score;
    }
    score * (-elapsed_secs / half_life_secs).exp2()
}

/// Per-edit score weight: 1.0 plus a byte-change bonus, capped at 2.0.
pub fn edit_weight(byte_change: i64) -> f64 {
    1.0 + (byte_change.unsigned_abs() as f64).min(WEIGHT_SATURATION) / WEIGHT_SATURATION
}

/// Maintains the decayed trending scores and serves the leaderboard.
pub struct TrendingScorer {
    store: Arc<dyn Store>,
    config: TrendingConfig,
}

impl std::fmt::Debug for TrendingScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrendingScorer")
            .field("config", &self.config)
            .finish()
    }
}

impl TrendingScorer {
    pub fn new(store: Arc<dyn Store>, config: TrendingConfig) -> Self {
        Self { store, config }
    }

    /// Fold one edit into the page's score.
    ///
    /// The stored score is decayed from the page's previous `last_edit`
    /// to this edit's timestamp, then bumped by the edit weight.
    /// Duplicate deliveries over-count by at most one weight, which the
    /// decay erodes quickly.
    pub async fn handle(&self, edit: &Edit) -> Result<()> {
        let meta_key = keys::trending_meta(&edit.title);

        let score_old = self
            .store
            .zset_score(keys::TRENDING_PAGES, &edit.title)
            .await?
            .unwrap_or(0.0);
        let last_edit = self.read_meta_i64(&meta_key, "last_edit").await?;

        let elapsed = last_edit.map_or(0.0, |last| (edit.timestamp - last) as f64);
        let decayed = decay(score_old, elapsed, self.config.half_life_secs());
        let score_new = decayed + edit_weight(edit.byte_change());

        self.store
            .zset_add(keys::TRENDING_PAGES, &edit.title, score_new)
            .await?;
        self.store
            .hash_set_all(
                &meta_key,
                &[
                    ("last_edit".to_string(), edit.timestamp.to_string()),
                    ("language".to_string(), edit.language().to_string()),
                ],
                META_TTL,
            )
            .await?;
        self.store
            .incr_with_ttl(&keys::trending_hour(&edit.title), HOUR_WINDOW)
            .await?;
        Ok(())
    }

    /// Read the top `k` pages, decayed to `now`, ties broken by the
    /// most recent edit.
    pub async fn leaderboard(&self, k: u64, now: i64) -> Result<Vec<TrendingEntry>> {
        let rows = self
            .store
            .zset_top(keys::TRENDING_PAGES, self.config.max_pages)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (title, score) in rows {
            let meta_key = keys::trending_meta(&title);
            let last_edit = self.read_meta_i64(&meta_key, "last_edit").await?.unwrap_or(now);
            let language = self
                .read_meta(&meta_key, "language")
                .await?
                .unwrap_or_default();
            let edits_1h = self.store.counter(&keys::trending_hour(&title)).await?;

            let current = decay(
                score,
                (now - last_edit) as f64,
                self.config.half_life_secs(),
            );
            if current < self.config.score_floor {
                continue;
            }
            entries.push(TrendingEntry {
                title,
                score: current,
                last_edit,
                language,
                edits_1h,
            });
        }

        entries.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.last_edit.cmp(&a.last_edit))
        });
        entries.truncate(k as usize);
        Ok(entries)
    }

    /// One prune pass: decay every stored score to `now`, drop entries
    /// below the floor, and truncate to the leaderboard cap.
    pub async fn prune_once(&self, now: i64) -> Result<u64> {
        let rows = self.store.zset_range(keys::TRENDING_PAGES, 0, -1).await?;
        let mut removed = 0u64;

        for (title, score) in rows {
            let meta_key = keys::trending_meta(&title);
            let last_edit = self.read_meta_i64(&meta_key, "last_edit").await?.unwrap_or(now);
            let current = decay(
                score,
                (now - last_edit) as f64,
                self.config.half_life_secs(),
            );

            if current < self.config.score_floor {
                self.store
                    .zset_remove(keys::TRENDING_PAGES, &title)
                    .await?;
                self.store.delete(&meta_key).await?;
                removed += 1;
                continue;
            }

            // Normalize the stored score to the prune instant so the
            // trim below ranks pages fairly.
            self.store
                .zset_add(keys::TRENDING_PAGES, &title, current)
                .await?;
            self.store
                .hash_set_all(
                    &meta_key,
                    &[("last_edit".to_string(), now.to_string())],
                    META_TTL,
                )
                .await?;
        }

        removed += self
            .store
            .zset_trim_to(keys::TRENDING_PAGES, self.config.max_pages)
            .await?;

        if removed > 0 {
            debug!("trending prune removed {} entries", removed);
        }
        Ok(removed)
    }

    /// Run the periodic pruner until cancelled.
    pub async fn run_pruner(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.prune_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("trending pruner stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    if let Err(e) = self.prune_once(now).await {
                        warn!("trending prune failed: {}", e);
                    }
                }
            }
        }
    }

    async fn read_meta(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .hash_get_all(key)
            .await?
            .into_iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v))
    }

    async fn read_meta_i64(&self, key: &str, field: &str) -> Result<Option<i64>> {
        Ok(self
            .read_meta(key, field)
            .await?
            .and_then(|v| v.parse().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use wikipulse_model::EditKind;

    fn edit(title: &str, ts: i64, change: i64) -> Edit {
        Edit {
            id: 1,
            kind: EditKind::Edit,
            title: title.to_string(),
            user: "User".to_string(),
            bot: false,
            wiki: "enwiki".to_string(),
            server_url: String::new(),
            timestamp: ts,
            length_old: 1000,
            length_new: 1000 + change,
            revision_old: 1,
            revision_new: 2,
            comment: String::new(),
        }
    }

    fn scorer(store: Arc<MemoryStore>) -> TrendingScorer {
        TrendingScorer::new(store, TrendingConfig::default())
    }

    #[test]
    fn weight_is_capped() {
        assert!((edit_weight(0) - 1.0).abs() < f64::EPSILON);
        assert!((edit_weight(1000) - 1.5).abs() < f64::EPSILON);
        assert!((edit_weight(2000) - 2.0).abs() < f64::EPSILON);
        assert!((edit_weight(-50_000) - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn score_halves_after_one_half_life() {
        let store = Arc::new(MemoryStore::new());
        let scorer = scorer(store);

        let t0 = 1_700_000_000;
        scorer.handle(&edit("Z", t0, 0)).await.unwrap();

        // Default half-life is 30 minutes.
        let board = scorer.leaderboard(10, t0 + 1800).await.unwrap();
        assert_eq!(board.len(), 1);
        assert!((board[0].score - 0.5).abs() < 0.05);
        assert_eq!(board[0].language, "en");
        assert_eq!(board[0].edits_1h, 1);
    }

    #[tokio::test]
    async fn score_accumulates_and_decays_between_edits() {
        let store = Arc::new(MemoryStore::new());
        let scorer = scorer(store);

        let t0 = 1_700_000_000;
        scorer.handle(&edit("Z", t0, 0)).await.unwrap();
        scorer.handle(&edit("Z", t0 + 1800, 0)).await.unwrap();

        // 1.0 decayed to 0.5, plus a fresh 1.0.
        let board = scorer.leaderboard(10, t0 + 1800).await.unwrap();
        assert!((board[0].score - 1.5).abs() < 0.05);
    }

    #[tokio::test]
    async fn duplicate_delivery_overcounts_by_at_most_one_weight() {
        let store = Arc::new(MemoryStore::new());
        let scorer = scorer(store);

        let e = edit("Z", 1_700_000_000, 0);
        scorer.handle(&e).await.unwrap();
        scorer.handle(&e).await.unwrap();

        let board = scorer.leaderboard(10, e.timestamp).await.unwrap();
        assert!(board[0].score <= 2.0 + f64::EPSILON);
    }

    #[tokio::test]
    async fn leaderboard_orders_by_score_then_recency() {
        let store = Arc::new(MemoryStore::new());
        let scorer = scorer(store.clone());

        let t0 = 1_700_000_000;
        scorer.handle(&edit("A", t0, 0)).await.unwrap();
        scorer.handle(&edit("B", t0, 2000)).await.unwrap();
        // Same stored score as A; its later edit decays less and ranks ahead.
        store
            .zset_add(keys::TRENDING_PAGES, "C", 1.0)
            .await
            .unwrap();
        store
            .hash_set_all(
                &keys::trending_meta("C"),
                &[("last_edit".to_string(), (t0 + 100).to_string())],
                Duration::from_secs(3600),
            )
            .await
            .unwrap();

        let board = scorer.leaderboard(10, t0 + 100).await.unwrap();
        let titles: Vec<&str> = board.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles.len(), 3);
        assert_eq!(titles[0], "B");
        assert_eq!(titles[1], "C");
    }

    #[tokio::test]
    async fn pruner_truncates_and_drops_dead_scores() {
        let store = Arc::new(MemoryStore::new());
        let config = TrendingConfig {
            max_pages: 2,
            ..Default::default()
        };
        let scorer = TrendingScorer::new(store.clone(), config);

        let t0 = 1_700_000_000;
        scorer.handle(&edit("A", t0, 0)).await.unwrap();
        scorer.handle(&edit("B", t0, 500)).await.unwrap();
        scorer.handle(&edit("C", t0, 2000)).await.unwrap();

        // Three tracked, cap is two: the weakest entry goes.
        scorer.prune_once(t0 + 60).await.unwrap();
        assert_eq!(store.zset_card(keys::TRENDING_PAGES).await.unwrap(), 2);
        let board = scorer.leaderboard(10, t0 + 60).await.unwrap();
        assert!(board.iter().all(|e| e.title != "A"));

        // Two days of decay puts every score under the floor.
        scorer.prune_once(t0 + 2 * 86_400).await.unwrap();
        assert_eq!(store.zset_card(keys::TRENDING_PAGES).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn prune_normalizes_stale_scores_before_trimming() {
        let store = Arc::new(MemoryStore::new());
        let config = TrendingConfig {
            max_pages: 1,
            ..Default::default()
        };
        let scorer = TrendingScorer::new(store.clone(), config);

        let t0 = 1_700_000_000;
        // "Old" has a big stored score from hours ago; "Fresh" is small
        // but current. After normalization Fresh outranks Old.
        scorer.handle(&edit("Old", t0 - 4 * 3600, 2000)).await.unwrap();
        scorer.handle(&edit("Fresh", t0, 0)).await.unwrap();

        scorer.prune_once(t0).await.unwrap();
        let board = scorer.leaderboard(10, t0).await.unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].title, "Fresh");
    }
}
