//! Upstream event-stream client: maintains the SSE connection,
//! normalizes and filters events, and feeds the log producer.

use crate::error::{PulseError, Result};
use crate::log::{EditProducer, ProduceOutcome};
use dashmap::DashMap;
use futures_util::StreamExt;
use rand::Rng;
use reqwest::header;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wikipulse_config::IngestConfig;
use wikipulse_model::{DropReason, Edit, RawRecentChange};

/// Reconnect backoff bounds.
const BACKOFF_MIN: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Counters exported by the ingestion stage.
#[derive(Debug, Default)]
pub struct IngestCounters {
    /// Data lines received from the stream.
    pub received: AtomicU64,
    /// Edits accepted into the producer ring.
    pub accepted: AtomicU64,
    /// Edits dropped because the ring was full.
    pub dropped_backpressure: AtomicU64,
    /// Edits dropped by the language whitelist.
    pub filtered_language: AtomicU64,
    /// Edits dropped by the bot filter.
    pub filtered_bot: AtomicU64,
    /// Events rejected at the validation boundary, by reason.
    rejected: DashMap<&'static str, AtomicU64>,
    /// Stream reconnects performed.
    pub reconnects: AtomicU64,
}

impl IngestCounters {
    fn reject(&self, reason: DropReason) {
        self.rejected
            .entry(reason.as_str())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Rejection counts by reason, for health reporting.
    pub fn rejected_by_reason(&self) -> Vec<(&'static str, u64)> {
        self.rejected
            .iter()
            .map(|e| (*e.key(), e.value().load(Ordering::Relaxed)))
            .collect()
    }
}

/// Extract the payload of an SSE `data:` line, if it is one.
fn sse_data(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    let payload = rest.strip_prefix(' ').unwrap_or(rest).trim_end();
    if payload.is_empty() { None } else { Some(payload) }
}

/// Long-lived client for the upstream recent-changes stream.
pub struct StreamClient {
    http: reqwest::Client,
    config: IngestConfig,
    producer: Arc<EditProducer>,
    /// Exported counters.
    pub counters: Arc<IngestCounters>,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("url", &self.config.stream_url)
            .finish()
    }
}

impl StreamClient {
    pub fn new(config: IngestConfig, producer: Arc<EditProducer>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PulseError::Upstream(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            config,
            producer,
            counters: Arc::new(IngestCounters::default()),
        })
    }

    /// Run until cancelled, reconnecting with jittered exponential
    /// backoff. Connection loss is never fatal.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut backoff = BACKOFF_MIN;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.stream_once(&cancel).await {
                Ok(()) => {
                    // Stream ended or we were cancelled.
                    if cancel.is_cancelled() {
                        break;
                    }
                    info!("upstream stream ended, reconnecting");
                    backoff = BACKOFF_MIN;
                }
                Err(e) => {
                    warn!("upstream stream error: {}; reconnecting in <= {:?}", e, backoff);
                }
            }

            self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
            let wait = full_jitter(backoff);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            backoff = (backoff * 2).min(BACKOFF_MAX);
        }
        info!("stream client stopped");
    }

    /// One connection lifetime: connect, then pump lines until the
    /// stream ends or we are cancelled.
    async fn stream_once(&self, cancel: &CancellationToken) -> Result<()> {
        info!("connecting to {}", self.config.stream_url);
        let response = self
            .http
            .get(&self.config.stream_url)
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;

        info!("upstream stream connected");
        let mut body = response.bytes_stream();
        // Byte buffer: chunk boundaries can split multi-byte characters,
        // so decoding happens per complete line.
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                chunk = body.next() => chunk,
            };
            let Some(chunk) = chunk else {
                return Ok(());
            };
            buffer.extend_from_slice(&chunk?);

            // Process every complete line, keep the partial tail.
            while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line);
                self.handle_line(line.trim_end_matches(['\n', '\r']));
            }
        }
    }

    fn handle_line(&self, line: &str) {
        let Some(payload) = sse_data(line) else {
            return;
        };
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        self.handle_event(payload, chrono::Utc::now().timestamp());
    }

    /// Validate, filter and produce one event payload. `now` is passed
    /// in so skew handling is deterministic under test.
    pub fn handle_event(&self, payload: &str, now: i64) {
        let raw: RawRecentChange = match serde_json::from_str(payload) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("malformed event: {}", e);
                self.counters.reject(DropReason::Malformed);
                return;
            }
        };

        let edit = match Edit::from_raw(raw, now) {
            Ok(edit) => edit,
            Err(reason) => {
                debug!("rejected event: {}", reason.as_str());
                self.counters.reject(reason);
                return;
            }
        };

        if !self.config.languages.is_empty()
            && !self.config.languages.iter().any(|l| l == edit.language())
        {
            self.counters.filtered_language.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if self.config.exclude_bots && edit.bot {
            self.counters.filtered_bot.fetch_add(1, Ordering::Relaxed);
            return;
        }

        // A full ring drops the event rather than blocking the stream.
        match self.producer.produce(edit) {
            ProduceOutcome::Accepted => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
            }
            ProduceOutcome::Dropped => {
                self.counters
                    .dropped_backpressure
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Full-jitter backoff: a uniform draw from (0, cap].
fn full_jitter(cap: Duration) -> Duration {
    let cap_ms = cap.as_millis().max(1) as u64;
    Duration::from_millis(rand::rng().random_range(1..=cap_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{BatchSink, ProducerTuning};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct CollectSink {
        edits: Mutex<Vec<Edit>>,
    }

    #[async_trait]
    impl BatchSink for CollectSink {
        async fn write(&self, batch: &[Edit]) -> Result<()> {
            self.edits.lock().extend_from_slice(batch);
            Ok(())
        }
    }

    const NOW: i64 = 1_700_000_000;

    fn client(config: IngestConfig) -> (StreamClient, Arc<EditProducer>) {
        let sink = Arc::new(CollectSink {
            edits: Mutex::new(Vec::new()),
        });
        let (producer, _worker) = EditProducer::start(sink, ProducerTuning::default());
        let producer = Arc::new(producer);
        (
            StreamClient::new(config, producer.clone()).unwrap(),
            producer,
        )
    }

    fn event(wiki: &str, bot: bool) -> String {
        format!(
            r#"{{"id":1,"type":"edit","title":"T","user":"U","bot":{bot},"wiki":"{wiki}",
               "timestamp":{NOW},"length":{{"old":1,"new":2}},"revision":{{"old":1,"new":2}}}}"#
        )
    }

    #[test]
    fn sse_data_lines_are_extracted() {
        assert_eq!(sse_data("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_data("data:{\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_data("event: message"), None);
        assert_eq!(sse_data(": heartbeat"), None);
        assert_eq!(sse_data(""), None);
        assert_eq!(sse_data("data:"), None);
    }

    #[tokio::test]
    async fn valid_events_are_accepted() {
        let (client, producer) = client(IngestConfig::default());
        client.handle_event(&event("enwiki", false), NOW);
        assert_eq!(client.counters.accepted.load(Ordering::Relaxed), 1);
        assert_eq!(producer.counters.accepted.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn malformed_and_invalid_events_are_counted_by_reason() {
        let (client, _) = client(IngestConfig::default());

        client.handle_event("not json", NOW);
        client.handle_event(&event("", false), NOW);
        client.handle_event(
            &format!(r#"{{"type":"edit","title":"T","user":"U","wiki":"enwiki","timestamp":{}}}"#, NOW + 7200),
            NOW,
        );

        let mut rejected = client.counters.rejected_by_reason();
        rejected.sort();
        assert_eq!(
            rejected,
            vec![("clock_skew", 1), ("invalid_wiki", 1), ("malformed", 1)]
        );
        assert_eq!(client.counters.accepted.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn language_and_bot_filters_apply() {
        let config = IngestConfig {
            languages: vec!["en".to_string()],
            exclude_bots: true,
            ..Default::default()
        };
        let (client, _) = client(config);

        client.handle_event(&event("dewiki", false), NOW);
        client.handle_event(&event("enwiki", true), NOW);
        client.handle_event(&event("enwiki", false), NOW);

        assert_eq!(client.counters.filtered_language.load(Ordering::Relaxed), 1);
        assert_eq!(client.counters.filtered_bot.load(Ordering::Relaxed), 1);
        assert_eq!(client.counters.accepted.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn ring_overflow_counts_as_backpressure() {
        let sink = Arc::new(CollectSink {
            edits: Mutex::new(Vec::new()),
        });
        let tuning = ProducerTuning {
            ring_capacity: 2,
            ..Default::default()
        };
        let (producer, _worker) = EditProducer::start(sink, tuning);
        let client = StreamClient::new(IngestConfig::default(), Arc::new(producer)).unwrap();

        for _ in 0..5 {
            client.handle_event(&event("enwiki", false), NOW);
        }
        // Two fit the ring before the worker gets a chance to run.
        assert_eq!(client.counters.accepted.load(Ordering::Relaxed), 2);
        assert_eq!(client.counters.dropped_backpressure.load(Ordering::Relaxed), 3);
    }
}
