//! Batched, keyed log producer with a bounded in-memory ring.
//!
//! `produce` never blocks: when the ring is full the edit is dropped
//! and counted, which is the pipeline's backpressure signal. A single
//! background worker drains the ring into batches and writes them to
//! the log keyed by title, so per-page order survives partitioning.

use crate::error::{PulseError, Result};
use async_trait::async_trait;
use futures::future::join_all;
use rdkafka::ClientConfig;
use rdkafka::message::OwnedHeaders;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wikipulse_config::KafkaConfig;
use wikipulse_model::Edit;

/// Deadline on a single log write.
const PRODUCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of offering an edit to the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProduceOutcome {
    /// The edit is in the ring and will be written.
    Accepted,
    /// The ring was full; the edit was dropped and counted.
    Dropped,
}

/// Destination for drained batches. The Kafka sink is the production
/// implementation; tests substitute their own.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Write a batch, preserving submission order per title.
    async fn write(&self, batch: &[Edit]) -> Result<()>;
}

/// Kafka-backed [`BatchSink`]: snappy compression, `acks=1`, keyed by
/// title.
pub struct KafkaSink {
    producer: FutureProducer,
    topic: String,
}

impl std::fmt::Debug for KafkaSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaSink").field("topic", &self.topic).finish()
    }
}

impl KafkaSink {
    pub fn connect(kafka: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &kafka.brokers)
            .set("compression.type", "snappy")
            .set("acks", "1")
            .set("message.timeout.ms", "10000")
            .create()?;

        info!(
            "log producer connected to {} (topic {})",
            kafka.brokers, kafka.topic
        );
        Ok(Self {
            producer,
            topic: kafka.topic.clone(),
        })
    }

    /// Flush everything buffered inside the client.
    pub fn flush(&self) -> Result<()> {
        self.producer.flush(PRODUCE_TIMEOUT)?;
        Ok(())
    }
}

#[async_trait]
impl BatchSink for KafkaSink {
    async fn write(&self, batch: &[Edit]) -> Result<()> {
        let mut payloads = Vec::with_capacity(batch.len());
        for edit in batch {
            payloads.push(serde_json::to_string(edit)?);
        }

        // Queue every record first; queue order fixes per-partition
        // order. Await the acks afterwards.
        let mut pending = Vec::with_capacity(batch.len());
        for (edit, payload) in batch.iter().zip(&payloads) {
            let headers = OwnedHeaders::new()
                .insert(rdkafka::message::Header {
                    key: "wiki",
                    value: Some(edit.wiki.as_str()),
                })
                .insert(rdkafka::message::Header {
                    key: "language",
                    value: Some(edit.language()),
                })
                .insert(rdkafka::message::Header {
                    key: "timestamp",
                    value: Some(edit.timestamp.to_string().as_str()),
                })
                .insert(rdkafka::message::Header {
                    key: "bot",
                    value: Some(if edit.bot { "1" } else { "0" }),
                });

            let record = FutureRecord::to(&self.topic)
                .key(&edit.title)
                .payload(payload.as_str())
                .headers(headers);
            pending.push(self.producer.send(record, PRODUCE_TIMEOUT));
        }

        for result in join_all(pending).await {
            if let Err((e, _)) = result {
                return Err(PulseError::Log(format!("produce failed: {e}")));
            }
        }
        Ok(())
    }
}

/// Ring and batching parameters.
#[derive(Debug, Clone)]
pub struct ProducerTuning {
    /// Bounded ring capacity.
    pub ring_capacity: usize,
    /// Maximum edits per written batch.
    pub max_batch: usize,
    /// Longest a non-full batch waits before being written.
    pub linger: Duration,
}

impl Default for ProducerTuning {
    fn default() -> Self {
        Self {
            ring_capacity: 1000,
            max_batch: 100,
            linger: Duration::from_millis(100),
        }
    }
}

/// Counters exported by the producer.
#[derive(Debug, Default)]
pub struct ProducerCounters {
    /// Edits accepted into the ring.
    pub accepted: AtomicU64,
    /// Edits dropped because the ring was full.
    pub dropped: AtomicU64,
    /// Batches that failed to write after retry-by-timeout.
    pub write_errors: AtomicU64,
}

/// Non-blocking front end over the ring.
pub struct EditProducer {
    tx: mpsc::Sender<Edit>,
    /// Exported counters.
    pub counters: Arc<ProducerCounters>,
}

impl std::fmt::Debug for EditProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditProducer")
            .field("capacity", &self.tx.capacity())
            .finish()
    }
}

impl EditProducer {
    /// Start the producer with its drain worker. The returned handle
    /// completes once [`EditProducer::shutdown`] has drained the ring.
    pub fn start(sink: Arc<dyn BatchSink>, tuning: ProducerTuning) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(tuning.ring_capacity);
        let counters = Arc::new(ProducerCounters::default());
        let worker = tokio::spawn(drain_loop(sink, rx, tuning, counters.clone()));
        (Self { tx, counters }, worker)
    }

    /// Offer an edit. Never blocks; a full ring drops the edit.
    pub fn produce(&self, edit: Edit) -> ProduceOutcome {
        match self.tx.try_send(edit) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                ProduceOutcome::Accepted
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                ProduceOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("producer ring closed; dropping edit");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                ProduceOutcome::Dropped
            }
        }
    }

    /// Close the ring. The drain worker writes what remains and exits;
    /// await the handle from [`EditProducer::start`] to join it.
    pub fn shutdown(self) {
        drop(self.tx);
    }
}

async fn drain_loop(
    sink: Arc<dyn BatchSink>,
    mut rx: mpsc::Receiver<Edit>,
    tuning: ProducerTuning,
    counters: Arc<ProducerCounters>,
) {
    let mut batch: Vec<Edit> = Vec::with_capacity(tuning.max_batch);

    'drain: while let Some(first) = rx.recv().await {
        batch.push(first);
        let deadline = tokio::time::Instant::now() + tuning.linger;

        // Fill the batch until it is full, the linger elapses, or the
        // ring closes.
        let mut closed = false;
        while batch.len() < tuning.max_batch {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(edit)) => batch.push(edit),
                Ok(None) => {
                    closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        write_batch(&sink, &mut batch, &counters).await;
        if closed {
            break 'drain;
        }
    }

    // Ring closed: flush anything the final recv left behind.
    while let Ok(edit) = rx.try_recv() {
        batch.push(edit);
    }
    if !batch.is_empty() {
        write_batch(&sink, &mut batch, &counters).await;
    }
    info!("producer drain worker exited");
}

async fn write_batch(
    sink: &Arc<dyn BatchSink>,
    batch: &mut Vec<Edit>,
    counters: &ProducerCounters,
) {
    debug!("writing batch of {} edits", batch.len());
    if let Err(e) = sink.write(batch).await {
        counters.write_errors.fetch_add(1, Ordering::Relaxed);
        warn!("batch write failed, {} edits lost: {}", batch.len(), e);
    }
    batch.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::sync::Notify;
    use wikipulse_model::EditKind;

    fn edit(title: &str, id: u64) -> Edit {
        Edit {
            id,
            kind: EditKind::Edit,
            title: title.to_string(),
            user: "User".to_string(),
            bot: false,
            wiki: "enwiki".to_string(),
            server_url: String::new(),
            timestamp: 1_700_000_000,
            length_old: 0,
            length_new: 10,
            revision_old: 1,
            revision_new: 2,
            comment: String::new(),
        }
    }

    /// Sink that records batches and can be paused to hold the worker.
    #[derive(Default)]
    struct GateSink {
        written: Mutex<Vec<Edit>>,
        gate_open: std::sync::atomic::AtomicBool,
        opened: Notify,
    }

    impl GateSink {
        fn new_closed() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn open(&self) {
            self.gate_open.store(true, Ordering::SeqCst);
            self.opened.notify_waiters();
        }
    }

    #[async_trait]
    impl BatchSink for GateSink {
        async fn write(&self, batch: &[Edit]) -> Result<()> {
            while !self.gate_open.load(Ordering::SeqCst) {
                self.opened.notified().await;
            }
            self.written.lock().extend_from_slice(batch);
            Ok(())
        }
    }

    fn tuning(ring: usize) -> ProducerTuning {
        ProducerTuning {
            ring_capacity: ring,
            max_batch: 3,
            linger: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn full_ring_drops_without_losing_accepted_edits() {
        let sink = GateSink::new_closed();
        let (producer, worker) = EditProducer::start(sink.clone(), tuning(4));

        // The paused worker may pull one edit out of the ring into its
        // current batch, so overfill well past capacity.
        let mut accepted = 0u64;
        let mut dropped = 0u64;
        for i in 0..20 {
            match producer.produce(edit("X", i)) {
                ProduceOutcome::Accepted => accepted += 1,
                ProduceOutcome::Dropped => dropped += 1,
            }
        }
        assert!(dropped > 0, "ring never filled");
        assert_eq!(
            producer.counters.dropped.load(Ordering::Relaxed),
            dropped
        );

        // Resume the worker and shut down: every accepted edit lands,
        // in submission order.
        sink.open();
        producer.shutdown();
        worker.await.unwrap();

        let written = sink.written.lock();
        assert_eq!(written.len() as u64, accepted);
        let ids: Vec<u64> = written.iter().map(|e| e.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted, "per-title order not preserved");
    }

    #[tokio::test]
    async fn shutdown_flushes_partial_batch() {
        let sink = GateSink::new_closed();
        sink.open();
        let (producer, worker) = EditProducer::start(sink.clone(), tuning(100));

        for i in 0..5 {
            assert_eq!(producer.produce(edit("X", i)), ProduceOutcome::Accepted);
        }
        producer.shutdown();
        worker.await.unwrap();

        assert_eq!(sink.written.lock().len(), 5);
    }

    #[tokio::test]
    async fn batches_respect_max_size() {
        let sink = GateSink::new_closed();
        sink.open();

        // Track batch sizes through a wrapper.
        struct SizeSink {
            inner: Arc<GateSink>,
            sizes: Mutex<Vec<usize>>,
        }
        #[async_trait]
        impl BatchSink for SizeSink {
            async fn write(&self, batch: &[Edit]) -> Result<()> {
                self.sizes.lock().push(batch.len());
                self.inner.write(batch).await
            }
        }

        let size_sink = Arc::new(SizeSink {
            inner: sink,
            sizes: Mutex::new(Vec::new()),
        });
        let (producer, worker) = EditProducer::start(size_sink.clone(), tuning(100));

        for i in 0..10 {
            producer.produce(edit("X", i));
        }
        producer.shutdown();
        worker.await.unwrap();

        let sizes = size_sink.sizes.lock();
        assert!(sizes.iter().all(|s| *s <= 3), "batch exceeded max: {sizes:?}");
        assert_eq!(sizes.iter().sum::<usize>(), 10);
    }
}
