//! The fan-out hub: subscribes once to the store's pub/sub channels and
//! multiplexes messages across all matching subscriptions.

use crate::websocket::connection::{FeedChannel, Offer, Subscriber};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wikipulse_config::FanoutConfig;
use wikipulse_core::store::{Store, keys};
use wikipulse_model::{FeedFilter, FeedMessage};

/// Pause before re-subscribing after the pub/sub connection drops.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

/// Counters exported by the hub.
#[derive(Debug, Default)]
pub struct HubCounters {
    /// Messages queued to subscribers.
    pub delivered: AtomicU64,
    /// Messages dropped for individual slow subscribers.
    pub dropped: AtomicU64,
    /// Subscriptions force-closed for sustained dropping.
    pub closed_slow: AtomicU64,
}

/// Multiplexes pub/sub traffic across live subscriptions.
pub struct FanoutHub {
    config: FanoutConfig,
    subscribers: DashMap<Uuid, Arc<Subscriber>>,
    /// Exported counters.
    pub counters: HubCounters,
}

impl fmt::Debug for FanoutHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanoutHub")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl FanoutHub {
    pub fn new(config: FanoutConfig) -> Self {
        Self {
            config,
            subscribers: DashMap::new(),
            counters: HubCounters::default(),
        }
    }

    /// Fan-out configuration (socket tasks need the liveness timings).
    pub fn config(&self) -> &FanoutConfig {
        &self.config
    }

    /// Register a new subscription.
    pub fn subscribe(
        &self,
        channel: FeedChannel,
        filter: FeedFilter,
    ) -> (Arc<Subscriber>, mpsc::Receiver<FeedMessage>) {
        let (subscriber, receiver) = Subscriber::new(channel, filter, self.config.buffer_size);
        self.subscribers.insert(subscriber.id, subscriber.clone());
        debug!(
            "subscriber {} joined {:?} ({} total)",
            subscriber.id,
            subscriber.channel,
            self.subscribers.len()
        );
        (subscriber, receiver)
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, id: Uuid) {
        if self.subscribers.remove(&id).is_some() {
            debug!("subscriber {} left ({} total)", id, self.subscribers.len());
        }
    }

    /// Live subscription count.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Route one message to every matching subscription.
    ///
    /// A slow subscriber only ever loses its own messages; everyone
    /// else receives theirs in hub-arrival order.
    pub fn deliver(&self, message: &FeedMessage) {
        let mut doomed: Vec<Uuid> = Vec::new();

        for entry in self.subscribers.iter() {
            let subscriber = entry.value();
            if !Self::matches(subscriber, message) {
                continue;
            }

            match subscriber.offer(message.clone(), &self.config) {
                Offer::Sent => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Offer::Dropped => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Offer::Closed => {
                    doomed.push(subscriber.id);
                }
            }
        }

        for id in doomed {
            self.counters.closed_slow.fetch_add(1, Ordering::Relaxed);
            warn!("closing subscriber {} after sustained drops", id);
            self.unsubscribe(id);
        }
    }

    fn matches(subscriber: &Subscriber, message: &FeedMessage) -> bool {
        match message {
            FeedMessage::Edit(edit) => {
                subscriber.channel == FeedChannel::Edits && subscriber.filter.matches(edit)
            }
            FeedMessage::Spike(_) | FeedMessage::EditWar(_) => {
                subscriber.channel == FeedChannel::Alerts
            }
        }
    }

    /// Pump the store's pub/sub channels into the subscriber set until
    /// cancelled. The hub holds the process's single subscription to
    /// each channel, so nothing is double-delivered.
    pub async fn run(&self, store: Arc<dyn Store>, cancel: CancellationToken) {
        loop {
            let mut messages = match store
                .subscribe(&[keys::CHANNEL_EDITS, keys::CHANNEL_ALERTS])
                .await
            {
                Ok(rx) => rx,
                Err(e) => {
                    warn!("hub pub/sub subscribe failed: {}; retrying", e);
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => continue,
                    }
                }
            };
            info!("fan-out hub subscribed to pub/sub channels");

            loop {
                let received = tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("fan-out hub stopped");
                        return;
                    }
                    received = messages.recv() => received,
                };
                let Some((channel, payload)) = received else {
                    warn!("hub pub/sub connection closed; re-subscribing");
                    break;
                };

                match serde_json::from_str::<FeedMessage>(&payload) {
                    Ok(message) => self.deliver(&message),
                    Err(e) => debug!("undecodable message on {}: {}", channel, e),
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wikipulse_model::{Edit, EditKind, SpikeAlert, SpikeSeverity};

    fn edit(wiki: &str, bot: bool) -> Edit {
        Edit {
            id: 1,
            kind: EditKind::Edit,
            title: "T".to_string(),
            user: "U".to_string(),
            bot,
            wiki: wiki.to_string(),
            server_url: String::new(),
            timestamp: 1_700_000_000,
            length_old: 0,
            length_new: 10,
            revision_old: 1,
            revision_new: 2,
            comment: String::new(),
        }
    }

    fn spike() -> FeedMessage {
        FeedMessage::Spike(SpikeAlert {
            page_title: "T".to_string(),
            spike_ratio: 5.0,
            edits_5min: 10,
            baseline_rate: 24,
            severity: SpikeSeverity::High,
            timestamp: 0,
        })
    }

    fn small_hub(buffer: usize, drop_threshold: u64) -> FanoutHub {
        FanoutHub::new(FanoutConfig {
            buffer_size: buffer,
            drop_threshold,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn edits_respect_channel_and_filter() {
        let hub = small_hub(8, 100);
        let (en_sub, mut en_rx) = hub.subscribe(
            FeedChannel::Edits,
            FeedFilter {
                language: Some("en".to_string()),
                ..Default::default()
            },
        );
        let (_alert_sub, mut alert_rx) =
            hub.subscribe(FeedChannel::Alerts, FeedFilter::default());

        hub.deliver(&FeedMessage::Edit(edit("dewiki", false)));
        hub.deliver(&FeedMessage::Edit(edit("enwiki", false)));
        hub.deliver(&spike());

        // The edit subscriber sees only the matching edit.
        let got = en_rx.try_recv().unwrap();
        assert!(matches!(got, FeedMessage::Edit(e) if e.wiki == "enwiki"));
        assert!(en_rx.try_recv().is_err());

        // The alert subscriber sees only the alert.
        assert!(matches!(alert_rx.try_recv().unwrap(), FeedMessage::Spike(_)));
        assert!(alert_rx.try_recv().is_err());

        drop(en_sub);
    }

    #[tokio::test]
    async fn slow_subscriber_drops_alone() {
        let hub = small_hub(2, 100);
        let (slow, _slow_rx_kept_full) = {
            // Keep the receiver but never drain it.
            let (sub, rx) = hub.subscribe(FeedChannel::Edits, FeedFilter::default());
            (sub, rx)
        };
        let (_fast, mut fast_rx) = hub.subscribe(FeedChannel::Edits, FeedFilter::default());

        // The fast subscriber drains between messages; the slow one
        // leaves its two-slot buffer full.
        let mut fast_count = 0;
        for _ in 0..5 {
            hub.deliver(&FeedMessage::Edit(edit("enwiki", false)));
            while fast_rx.try_recv().is_ok() {
                fast_count += 1;
            }
        }
        assert_eq!(fast_count, 5);
        assert_eq!(slow.dropped(), 3);
        assert_eq!(hub.counters.dropped.load(Ordering::Relaxed), 3);
        // Under the drop threshold nobody was closed.
        assert_eq!(hub.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn sustained_drops_close_the_subscriber() {
        let hub = small_hub(1, 3);
        let (slow, _rx) = hub.subscribe(FeedChannel::Edits, FeedFilter::default());
        let (_ok, mut ok_rx) = hub.subscribe(FeedChannel::Edits, FeedFilter::default());

        // The healthy subscriber drains as it goes; the slow one never
        // does and blows through the drop threshold.
        let mut seen = 0;
        for _ in 0..6 {
            hub.deliver(&FeedMessage::Edit(edit("enwiki", false)));
            while ok_rx.try_recv().is_ok() {
                seen += 1;
            }
        }

        assert!(slow.closed.is_cancelled());
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(hub.counters.closed_slow.load(Ordering::Relaxed), 1);
        assert_eq!(seen, 6);
    }

    #[tokio::test]
    async fn bots_are_filterable() {
        let hub = small_hub(8, 100);
        let (_sub, mut rx) = hub.subscribe(
            FeedChannel::Edits,
            FeedFilter {
                exclude_bots: true,
                ..Default::default()
            },
        );

        hub.deliver(&FeedMessage::Edit(edit("enwiki", true)));
        hub.deliver(&FeedMessage::Edit(edit("enwiki", false)));

        assert!(matches!(rx.try_recv().unwrap(), FeedMessage::Edit(e) if !e.bot));
        assert!(rx.try_recv().is_err());
    }
}
