//! The shared bounded KV store: the one piece of mutable state every
//! detector reads and writes.
//!
//! Components hold an `Arc<dyn Store>` and never reference one another;
//! all coordination happens through the atomic primitives defined here.
//! [`RedisStore`] is the production backend, [`MemoryStore`] backs tests
//! and single-node development without a Redis instance.

pub mod keys;
pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Atomic KV primitives required by the pipeline.
///
/// Semantics follow Redis: counters are strings holding integers,
/// TTLs are set when a key is first created, sorted sets order by
/// `f64` score with lexicographic member tiebreak.
#[async_trait]
pub trait Store: Send + Sync {
    // -- counters --

    /// Increment a counter, starting its TTL window on first increment.
    /// Returns the post-increment value.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64>;

    /// Read a counter; missing keys read as zero.
    async fn counter(&self, key: &str) -> Result<u64>;

    // -- plain keys --

    /// Whether a key currently exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete a key. Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Read a string value.
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Write a string value with a TTL, overwriting any previous value.
    async fn put_string(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Write a string value with a TTL only if the key does not exist.
    /// Returns whether the write happened.
    async fn put_string_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    // -- sets --

    /// Add a member to a set capped at `cap` members, refreshing the TTL.
    /// Returns whether the member is in the set afterwards (false means
    /// the set was full and the member was refused).
    async fn set_add_capped(&self, key: &str, member: &str, cap: u64, ttl: Duration)
    -> Result<bool>;

    /// Number of members in a set.
    async fn set_len(&self, key: &str) -> Result<u64>;

    // -- lists --

    /// Push to the head of a list, trim it to `cap` entries, refresh TTL.
    async fn list_push_capped(
        &self,
        key: &str,
        value: &str,
        cap: u64,
        ttl: Duration,
    ) -> Result<()>;

    /// Read a list range; `stop = -1` reads to the end.
    async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    /// Remove the first occurrence of a value from a list. Returns the
    /// number of entries removed.
    async fn list_remove(&self, key: &str, value: &str) -> Result<u64>;

    // -- hashes --

    /// Set several hash fields at once, refreshing the TTL.
    async fn hash_set_all(&self, key: &str, fields: &[(String, String)], ttl: Duration)
    -> Result<()>;

    /// Increment a hash field, starting the key's TTL window on creation.
    async fn hash_incr_with_ttl(
        &self,
        key: &str,
        field: &str,
        by: i64,
        ttl: Duration,
    ) -> Result<i64>;

    /// Read all fields of a hash.
    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>>;

    // -- sorted sets --

    /// Add or update a member with the given score.
    async fn zset_add(&self, key: &str, member: &str, score: f64) -> Result<()>;

    /// Read a member's score.
    async fn zset_score(&self, key: &str, member: &str) -> Result<Option<f64>>;

    /// Number of members.
    async fn zset_card(&self, key: &str) -> Result<u64>;

    /// Members with scores, ascending by score; `stop = -1` reads all.
    async fn zset_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<(String, f64)>>;

    /// Top `k` members by descending score.
    async fn zset_top(&self, key: &str, k: u64) -> Result<Vec<(String, f64)>>;

    /// Remove a member.
    async fn zset_remove(&self, key: &str, member: &str) -> Result<()>;

    /// Keep only the `max` highest-scoring members. Returns how many
    /// members were removed.
    async fn zset_trim_to(&self, key: &str, max: u64) -> Result<u64>;

    /// Remove members scoring strictly below `floor`. Returns how many
    /// members were removed.
    async fn zset_remove_below(&self, key: &str, floor: f64) -> Result<u64>;

    // -- pub/sub --

    /// Publish a payload on a channel.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Subscribe to channels. Messages arrive as `(channel, payload)`;
    /// the receiver closes when the backing connection does.
    async fn subscribe(&self, channels: &[&str]) -> Result<mpsc::Receiver<(String, String)>>;

    // -- monitoring --

    /// Used-memory percentage of the backing store, if it reports one.
    async fn used_memory_pct(&self) -> Result<Option<f64>>;
}
