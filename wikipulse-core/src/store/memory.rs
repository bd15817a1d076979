//! In-process [`Store`] implementation.
//!
//! Backs unit tests and single-node development without a Redis
//! instance. Semantics mirror the Redis backend, including TTL expiry;
//! the TTL clock can be advanced manually so expiry is deterministic
//! under test.

use crate::error::Result;
use crate::store::Store;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};

enum Value {
    Str(String),
    List(VecDeque<String>),
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
    Zset(HashMap<String, f64>),
}

struct Entry {
    value: Value,
    /// Expiry on the store's virtual clock; `None` means no TTL.
    expires_at: Option<Duration>,
}

/// In-memory [`Store`] with Redis-like semantics.
pub struct MemoryStore {
    start: Instant,
    skew: Mutex<Duration>,
    entries: Mutex<HashMap<String, Entry>>,
    pubsub: broadcast::Sender<(String, String)>,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("keys", &self.entries.lock().len())
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (pubsub, _) = broadcast::channel(1024);
        Self {
            start: Instant::now(),
            skew: Mutex::new(Duration::ZERO),
            entries: Mutex::new(HashMap::new()),
            pubsub,
        }
    }

    /// Advance the TTL clock without waiting, so tests can expire keys
    /// deterministically.
    pub fn advance(&self, by: Duration) {
        *self.skew.lock() += by;
    }

    fn now(&self) -> Duration {
        self.start.elapsed() + *self.skew.lock()
    }

    /// Run `f` over the live (non-expired) entry map.
    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>, Duration) -> T) -> T {
        let now = self.now();
        let mut entries = self.entries.lock();
        entries.retain(|_, e| e.expires_at.is_none_or(|at| at > now));
        f(&mut entries, now)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64> {
        Ok(self.with_entries(|entries, now| match entries.get_mut(key) {
            Some(entry) => {
                let current = match &entry.value {
                    Value::Str(s) => s.parse::<u64>().unwrap_or(0),
                    _ => 0,
                };
                let next = current + 1;
                entry.value = Value::Str(next.to_string());
                next
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Str("1".to_string()),
                        expires_at: Some(now + ttl),
                    },
                );
                1
            }
        }))
    }

    async fn counter(&self, key: &str) -> Result<u64> {
        Ok(self.with_entries(|entries, _| match entries.get(key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => s.parse().unwrap_or(0),
            _ => 0,
        }))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.with_entries(|entries, _| entries.contains_key(key)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.with_entries(|entries, _| {
            entries.remove(key);
        });
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.with_entries(|entries, _| match entries.get(key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Some(s.clone()),
            _ => None,
        }))
    }

    async fn put_string(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.with_entries(|entries, now| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: Some(now + ttl),
                },
            );
        });
        Ok(())
    }

    async fn put_string_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        Ok(self.with_entries(|entries, now| {
            if entries.contains_key(key) {
                false
            } else {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Str(value.to_string()),
                        expires_at: Some(now + ttl),
                    },
                );
                true
            }
        }))
    }

    async fn set_add_capped(
        &self,
        key: &str,
        member: &str,
        cap: u64,
        ttl: Duration,
    ) -> Result<bool> {
        Ok(self.with_entries(|entries, now| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Set(HashSet::new()),
                expires_at: Some(now + ttl),
            });
            entry.expires_at = Some(now + ttl);
            match &mut entry.value {
                Value::Set(set) => {
                    if set.contains(member) {
                        true
                    } else if (set.len() as u64) < cap {
                        set.insert(member.to_string());
                        true
                    } else {
                        false
                    }
                }
                _ => false,
            }
        }))
    }

    async fn set_len(&self, key: &str) -> Result<u64> {
        Ok(self.with_entries(|entries, _| match entries.get(key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => set.len() as u64,
            _ => 0,
        }))
    }

    async fn list_push_capped(
        &self,
        key: &str,
        value: &str,
        cap: u64,
        ttl: Duration,
    ) -> Result<()> {
        self.with_entries(|entries, now| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::List(VecDeque::new()),
                expires_at: Some(now + ttl),
            });
            entry.expires_at = Some(now + ttl);
            if let Value::List(list) = &mut entry.value {
                list.push_front(value.to_string());
                list.truncate(cap as usize);
            }
        });
        Ok(())
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        Ok(self.with_entries(|entries, _| match entries.get(key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                let len = list.len() as i64;
                let norm = |i: i64| -> i64 {
                    if i < 0 { (len + i).max(0) } else { i.min(len) }
                };
                let (start, stop) = (norm(start), norm(stop));
                if start > stop {
                    Vec::new()
                } else {
                    list.iter()
                        .skip(start as usize)
                        .take((stop - start + 1) as usize)
                        .cloned()
                        .collect()
                }
            }
            _ => Vec::new(),
        }))
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<u64> {
        Ok(self.with_entries(|entries, _| match entries.get_mut(key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => match list.iter().position(|v| v == value) {
                Some(idx) => {
                    list.remove(idx);
                    1
                }
                None => 0,
            },
            _ => 0,
        }))
    }

    async fn hash_set_all(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<()> {
        self.with_entries(|entries, now| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: Some(now + ttl),
            });
            entry.expires_at = Some(now + ttl);
            if let Value::Hash(hash) = &mut entry.value {
                for (field, value) in fields {
                    hash.insert(field.clone(), value.clone());
                }
            }
        });
        Ok(())
    }

    async fn hash_incr_with_ttl(
        &self,
        key: &str,
        field: &str,
        by: i64,
        ttl: Duration,
    ) -> Result<i64> {
        Ok(self.with_entries(|entries, now| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: Some(now + ttl),
            });
            entry.expires_at = Some(now + ttl);
            match &mut entry.value {
                Value::Hash(hash) => {
                    let slot = hash.entry(field.to_string()).or_insert_with(|| "0".into());
                    let next = slot.parse::<i64>().unwrap_or(0) + by;
                    *slot = next.to_string();
                    next
                }
                _ => 0,
            }
        }))
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>> {
        Ok(self.with_entries(|entries, _| match entries.get(key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => hash.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => Vec::new(),
        }))
    }

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.with_entries(|entries, _| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Zset(HashMap::new()),
                expires_at: None,
            });
            if let Value::Zset(zset) = &mut entry.value {
                zset.insert(member.to_string(), score);
            }
        });
        Ok(())
    }

    async fn zset_score(&self, key: &str, member: &str) -> Result<Option<f64>> {
        Ok(self.with_entries(|entries, _| match entries.get(key) {
            Some(Entry {
                value: Value::Zset(zset),
                ..
            }) => zset.get(member).copied(),
            _ => None,
        }))
    }

    async fn zset_card(&self, key: &str) -> Result<u64> {
        Ok(self.with_entries(|entries, _| match entries.get(key) {
            Some(Entry {
                value: Value::Zset(zset),
                ..
            }) => zset.len() as u64,
            _ => 0,
        }))
    }

    async fn zset_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<(String, f64)>> {
        Ok(self.with_entries(|entries, _| match entries.get(key) {
            Some(Entry {
                value: Value::Zset(zset),
                ..
            }) => {
                let mut rows: Vec<(String, f64)> =
                    zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
                rows.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
                let len = rows.len() as i64;
                let norm = |i: i64| -> i64 {
                    if i < 0 { (len + i).max(0) } else { i.min(len) }
                };
                let (start, stop) = (norm(start), norm(stop));
                if start > stop {
                    Vec::new()
                } else {
                    rows.into_iter()
                        .skip(start as usize)
                        .take((stop - start + 1) as usize)
                        .collect()
                }
            }
            _ => Vec::new(),
        }))
    }

    async fn zset_top(&self, key: &str, k: u64) -> Result<Vec<(String, f64)>> {
        let mut rows = self.zset_range(key, 0, -1).await?;
        rows.reverse();
        rows.truncate(k as usize);
        Ok(rows)
    }

    async fn zset_remove(&self, key: &str, member: &str) -> Result<()> {
        self.with_entries(|entries, _| {
            if let Some(Entry {
                value: Value::Zset(zset),
                ..
            }) = entries.get_mut(key)
            {
                zset.remove(member);
            }
        });
        Ok(())
    }

    async fn zset_trim_to(&self, key: &str, max: u64) -> Result<u64> {
        let doomed: Vec<String> = {
            let rows = self.zset_range(key, 0, -1).await?;
            let len = rows.len() as u64;
            if len <= max {
                return Ok(0);
            }
            rows.into_iter()
                .take((len - max) as usize)
                .map(|(m, _)| m)
                .collect()
        };
        let removed = doomed.len() as u64;
        self.with_entries(|entries, _| {
            if let Some(Entry {
                value: Value::Zset(zset),
                ..
            }) = entries.get_mut(key)
            {
                for member in &doomed {
                    zset.remove(member);
                }
            }
        });
        Ok(removed)
    }

    async fn zset_remove_below(&self, key: &str, floor: f64) -> Result<u64> {
        Ok(self.with_entries(|entries, _| {
            match entries.get_mut(key) {
                Some(Entry {
                    value: Value::Zset(zset),
                    ..
                }) => {
                    let before = zset.len();
                    zset.retain(|_, score| *score >= floor);
                    (before - zset.len()) as u64
                }
                _ => 0,
            }
        }))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        // No subscribers is fine; the message is simply dropped.
        let _ = self
            .pubsub
            .send((channel.to_string(), payload.to_string()));
        Ok(())
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<mpsc::Receiver<(String, String)>> {
        let wanted: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
        let mut source = self.pubsub.subscribe();
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok((channel, payload)) => {
                        if !wanted.contains(&channel) {
                            continue;
                        }
                        if tx.send((channel, payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("in-memory pub/sub dropped {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }

    async fn used_memory_pct(&self) -> Result<Option<f64>> {
        Ok(None)
    }
}
