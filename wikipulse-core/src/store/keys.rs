//! Key constructors for the shared KV keyspace.
//!
//! Every component goes through these so the keyspace has exactly one
//! definition.

/// Rolling activity counter for a page.
pub fn activity(title: &str) -> String {
    format!("activity:{title}")
}

/// Metadata hash for a hot page; presence marks the page hot.
pub fn hot(title: &str) -> String {
    format!("hot:{title}")
}

/// Sorted set of hot pages scored by promotion time.
pub const HOT_SET: &str = "hot:set";

/// Bounded set of distinct editors on a page.
pub fn editors(title: &str) -> String {
    format!("editors:{title}")
}

/// Capped ring of recent edit summaries on a page.
pub fn recent(title: &str) -> String {
    format!("recent:{title}")
}

/// Five-minute edit-rate counter for the spike detector.
pub fn rate_5m(title: &str) -> String {
    format!("rate_5m:{title}")
}

/// One-hour baseline counter for the spike detector.
pub fn rate_1h(title: &str) -> String {
    format!("rate_1h:{title}")
}

/// Spike repeat-suppression marker.
pub fn spike_cooldown(title: &str) -> String {
    format!("spike:cooldown:{title}")
}

/// Edit-war repeat-suppression marker; holds the last emitted alert.
pub fn war_cooldown(title: &str) -> String {
    format!("war:cooldown:{title}")
}

/// Sorted set of trending pages by decayed score.
pub const TRENDING_PAGES: &str = "trending:pages";

/// Per-page trending metadata hash (last edit, language).
pub fn trending_meta(title: &str) -> String {
    format!("trending:meta:{title}")
}

/// Hourly edit counter backing `edits_1h` on leaderboard rows.
pub fn trending_hour(title: &str) -> String {
    format!("trending:hour:{title}")
}

/// Capped list of recent spike alerts.
pub const ALERTS_SPIKE: &str = "alerts:spike";

/// Capped list of recent edit-war alerts.
pub const ALERTS_WAR: &str = "alerts:war";

/// Per-language daily edit counts.
pub fn language_stats(date: &str) -> String {
    format!("stats:languages:{date}")
}

/// Pub/sub channel carrying alerts to the fan-out hub.
pub const CHANNEL_ALERTS: &str = "pubsub:alerts";

/// Pub/sub channel carrying live edits to the fan-out hub.
pub const CHANNEL_EDITS: &str = "pubsub:edits";

/// Fixed-window connect counter for per-IP rate limiting.
pub fn connect_rate(ip: &str) -> String {
    format!("ratelimit:connect:{ip}")
}
