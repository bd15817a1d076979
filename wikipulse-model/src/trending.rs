//! Leaderboard entries produced by the trending scorer.

use serde::{Deserialize, Serialize};

/// One row of the trending leaderboard.
///
/// Entries are independent of the hot-page lifecycle; a page can trend
/// without ever having been promoted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingEntry {
    /// Page title.
    pub title: String,
    /// Time-decayed activity score.
    pub score: f64,
    /// Time of the most recent edit, epoch seconds.
    pub last_edit: i64,
    /// Language code of the page's wiki.
    pub language: String,
    /// Edits in the trailing hour.
    pub edits_1h: u64,
}
