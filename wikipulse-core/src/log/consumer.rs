//! Consumer-group reader: one per detector, at-least-once delivery.

use crate::error::Result;
use rdkafka::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};
use wikipulse_config::KafkaConfig;
use wikipulse_model::Edit;

/// Watermarks are refetched every this many messages per consumer.
const LAG_SAMPLE_EVERY: u64 = 100;

/// A consumer-group member reading normalized edits for one detector.
///
/// Detectors are idempotent, so at-least-once delivery with automatic
/// offset commits is sufficient.
pub struct EditConsumer {
    consumer: StreamConsumer,
    group: String,
    received: AtomicU64,
    lag: Arc<AtomicU64>,
}

impl std::fmt::Debug for EditConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditConsumer")
            .field("group", &self.group)
            .field("lag", &self.lag.load(Ordering::Relaxed))
            .finish()
    }
}

impl EditConsumer {
    /// Join the consumer group `{prefix}.{detector}` on the edits topic.
    pub fn connect(kafka: &KafkaConfig, detector: &str) -> Result<Self> {
        let group = format!("{}.{}", kafka.group_prefix, detector);
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &kafka.brokers)
            .set("group.id", &group)
            .set("enable.partition.eof", "false")
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .create()?;
        consumer.subscribe(&[&kafka.topic])?;

        info!("consumer group {} subscribed to {}", group, kafka.topic);
        Ok(Self {
            consumer,
            group,
            received: AtomicU64::new(0),
            lag: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Gauge holding the most recently observed partition lag.
    pub fn lag_gauge(&self) -> Arc<AtomicU64> {
        self.lag.clone()
    }

    /// Receive the next edit.
    ///
    /// Returns `None` for messages that carry no decodable edit (empty
    /// payload, malformed JSON); the offset is still committed, so a
    /// poison message cannot wedge the group.
    pub async fn next_edit(&self) -> Result<Option<Edit>> {
        let message = self.consumer.recv().await?;

        let count = self.received.fetch_add(1, Ordering::Relaxed) + 1;
        if count % LAG_SAMPLE_EVERY == 1 {
            self.observe_lag(message.topic(), message.partition(), message.offset());
        }

        let Some(payload) = message.payload() else {
            warn!("{}: message with empty payload", self.group);
            return Ok(None);
        };
        match serde_json::from_slice::<Edit>(payload) {
            Ok(edit) => Ok(Some(edit)),
            Err(e) => {
                warn!("{}: skipping undecodable message: {}", self.group, e);
                Ok(None)
            }
        }
    }

    fn observe_lag(&self, topic: &str, partition: i32, offset: i64) {
        match self
            .consumer
            .fetch_watermarks(topic, partition, Duration::from_secs(1))
        {
            Ok((_low, high)) => {
                let lag = (high - offset - 1).max(0) as u64;
                self.lag.store(lag, Ordering::Relaxed);
            }
            Err(e) => warn!("{}: failed to fetch watermarks: {}", self.group, e),
        }
    }

    /// Leave the group cleanly.
    pub fn close(self) {
        self.consumer.unsubscribe();
        info!("consumer group {} closed", self.group);
    }
}
