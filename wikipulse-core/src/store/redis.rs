//! Redis-backed [`Store`] implementation.

use crate::error::{PulseError, Result};
use crate::store::Store;
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::{AsyncCommands, aio::ConnectionManager};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Deadline applied to every KV call.
const OP_TIMEOUT: Duration = Duration::from_secs(3);

/// Capacity of the channel bridging the pub/sub connection to the hub.
const SUBSCRIBE_BUFFER: usize = 1024;

/// Production [`Store`] backed by Redis.
///
/// Commands go through a [`ConnectionManager`], which reconnects
/// transparently; the pub/sub side keeps its own dedicated connection.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisStore {
    /// Connect to Redis at `redis_url`.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        info!("Connecting to Redis store at {}", redis_url);

        let client = redis::Client::open(redis_url)
            .map_err(|e| PulseError::Store(format!("Failed to create Redis client: {e}")))?;

        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| PulseError::Store(format!("Failed to connect to Redis: {e}")))?;

        info!("Successfully connected to Redis store");

        Ok(Self { client, conn })
    }

    async fn deadline<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(OP_TIMEOUT, fut).await {
            Ok(res) => res.map_err(|e| PulseError::Store(format!("{op} failed: {e}"))),
            Err(_) => Err(PulseError::StoreTimeout(op.to_string())),
        }
    }
}

fn ttl_secs(ttl: Duration) -> i64 {
    (ttl.as_secs() as i64).max(1)
}

#[async_trait]
impl Store for RedisStore {
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64> {
        let mut conn = self.conn.clone();
        let value: u64 = self.deadline("INCR", conn.incr(key, 1u64)).await?;
        if value == 1 {
            self.deadline("EXPIRE", conn.expire::<_, ()>(key, ttl_secs(ttl)))
                .await?;
        }
        Ok(value)
    }

    async fn counter(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let value: Option<u64> = self.deadline("GET", conn.get(key)).await?;
        Ok(value.unwrap_or(0))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        self.deadline("EXISTS", conn.exists(key)).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        self.deadline("DEL", conn.del::<_, ()>(key)).await
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        self.deadline("GET", conn.get(key)).await
    }

    async fn put_string(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        self.deadline(
            "SETEX",
            conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)),
        )
        .await
    }

    async fn put_string_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = self
            .deadline(
                "SET NX",
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_secs(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn set_add_capped(
        &self,
        key: &str,
        member: &str,
        cap: u64,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();

        let present: bool = self.deadline("SISMEMBER", conn.sismember(key, member)).await?;
        if present {
            self.deadline("EXPIRE", conn.expire::<_, ()>(key, ttl_secs(ttl)))
                .await?;
            return Ok(true);
        }

        let len: u64 = self.deadline("SCARD", conn.scard(key)).await?;
        if len >= cap {
            debug!("set {} full ({} members), refusing add", key, len);
            return Ok(false);
        }

        self.deadline("SADD", conn.sadd::<_, _, ()>(key, member))
            .await?;
        self.deadline("EXPIRE", conn.expire::<_, ()>(key, ttl_secs(ttl)))
            .await?;
        Ok(true)
    }

    async fn set_len(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        self.deadline("SCARD", conn.scard(key)).await
    }

    async fn list_push_capped(
        &self,
        key: &str,
        value: &str,
        cap: u64,
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        self.deadline("LPUSH", conn.lpush::<_, _, ()>(key, value))
            .await?;
        self.deadline(
            "LTRIM",
            conn.ltrim::<_, ()>(key, 0, cap.saturating_sub(1) as isize),
        )
        .await?;
        self.deadline("EXPIRE", conn.expire::<_, ()>(key, ttl_secs(ttl)))
            .await?;
        Ok(())
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        self.deadline("LRANGE", conn.lrange(key, start as isize, stop as isize))
            .await
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        self.deadline("LREM", conn.lrem(key, 1, value)).await
    }

    async fn hash_set_all(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        self.deadline("HSET", conn.hset_multiple::<_, _, _, ()>(key, fields))
            .await?;
        self.deadline("EXPIRE", conn.expire::<_, ()>(key, ttl_secs(ttl)))
            .await?;
        Ok(())
    }

    async fn hash_incr_with_ttl(
        &self,
        key: &str,
        field: &str,
        by: i64,
        ttl: Duration,
    ) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = self.deadline("HINCRBY", conn.hincr(key, field, by)).await?;
        self.deadline("EXPIRE", conn.expire::<_, ()>(key, ttl_secs(ttl)))
            .await?;
        Ok(value)
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>> {
        let mut conn = self.conn.clone();
        let map: std::collections::HashMap<String, String> =
            self.deadline("HGETALL", conn.hgetall(key)).await?;
        Ok(map.into_iter().collect())
    }

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.conn.clone();
        self.deadline("ZADD", conn.zadd::<_, _, _, ()>(key, member, score))
            .await
    }

    async fn zset_score(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let mut conn = self.conn.clone();
        self.deadline("ZSCORE", conn.zscore(key, member)).await
    }

    async fn zset_card(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        self.deadline("ZCARD", conn.zcard(key)).await
    }

    async fn zset_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<(String, f64)>> {
        let mut conn = self.conn.clone();
        self.deadline(
            "ZRANGE",
            conn.zrange_withscores(key, start as isize, stop as isize),
        )
        .await
    }

    async fn zset_top(&self, key: &str, k: u64) -> Result<Vec<(String, f64)>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        self.deadline(
            "ZREVRANGE",
            conn.zrevrange_withscores(key, 0, k.saturating_sub(1) as isize),
        )
        .await
    }

    async fn zset_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        self.deadline("ZREM", conn.zrem::<_, _, ()>(key, member))
            .await
    }

    async fn zset_trim_to(&self, key: &str, max: u64) -> Result<u64> {
        let mut conn = self.conn.clone();
        let card: u64 = self.deadline("ZCARD", conn.zcard(key)).await?;
        if card <= max {
            return Ok(0);
        }
        // Drop the lowest-scoring entries, keeping the top `max` ranks.
        self.deadline(
            "ZREMRANGEBYRANK",
            conn.zremrangebyrank(key, 0, (card - max - 1) as isize),
        )
        .await
    }

    async fn zset_remove_below(&self, key: &str, floor: f64) -> Result<u64> {
        let mut conn = self.conn.clone();
        self.deadline(
            "ZREMRANGEBYSCORE",
            redis::cmd("ZREMRANGEBYSCORE")
                .arg(key)
                .arg("-inf")
                .arg(format!("({floor}"))
                .query_async(&mut conn),
        )
        .await
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        self.deadline("PUBLISH", conn.publish::<_, _, ()>(channel, payload))
            .await
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<mpsc::Receiver<(String, String)>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| PulseError::Store(format!("Failed to open pub/sub connection: {e}")))?;

        for channel in channels {
            pubsub
                .subscribe(*channel)
                .await
                .map_err(|e| PulseError::Store(format!("SUBSCRIBE {channel} failed: {e}")))?;
        }

        let (tx, rx) = mpsc::channel(SUBSCRIBE_BUFFER);
        tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let channel = msg.get_channel_name().to_string();
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Dropping non-UTF8 pub/sub payload on {}: {}", channel, e);
                        continue;
                    }
                };
                if tx.send((channel, payload)).await.is_err() {
                    break;
                }
            }
            debug!("pub/sub message stream closed");
        });

        Ok(rx)
    }

    async fn used_memory_pct(&self) -> Result<Option<f64>> {
        let mut conn = self.conn.clone();
        let info: String = self
            .deadline(
                "INFO",
                redis::cmd("INFO").arg("memory").query_async(&mut conn),
            )
            .await?;

        let mut used: Option<f64> = None;
        let mut max: Option<f64> = None;
        for line in info.lines() {
            if let Some(v) = line.strip_prefix("used_memory:") {
                used = v.trim().parse().ok();
            } else if let Some(v) = line.strip_prefix("maxmemory:") {
                max = v.trim().parse().ok();
            }
        }

        match (used, max) {
            (Some(used), Some(max)) if max > 0.0 => Ok(Some(used / max * 100.0)),
            _ => Ok(None),
        }
    }
}
