//! One live fan-out subscription: the bounded egress buffer, drop
//! accounting and liveness state.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wikipulse_config::FanoutConfig;
use wikipulse_model::{FeedFilter, FeedMessage};

/// Which stream a subscription is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedChannel {
    /// Live edits (`/ws/feed`).
    Edits,
    /// Spike and edit-war alerts (`/ws/alerts`).
    Alerts,
}

/// Outcome of offering a message to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Queued for delivery.
    Sent,
    /// Egress buffer full; dropped for this subscriber only.
    Dropped,
    /// Subscriber is closed (or was just closed for dropping too much).
    Closed,
}

/// A live subscription registered with the hub.
pub struct Subscriber {
    /// Unique subscription id.
    pub id: Uuid,
    /// Stream this subscription receives.
    pub channel: FeedChannel,
    /// Edit filter; alerts are never filtered.
    pub filter: FeedFilter,
    /// Cancelled when the hub force-closes the subscription.
    pub closed: CancellationToken,
    sender: mpsc::Sender<FeedMessage>,
    dropped_total: AtomicU64,
    window_dropped: AtomicU64,
    window_started: Mutex<Instant>,
    last_seen: Mutex<Instant>,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("dropped", &self.dropped_total.load(Ordering::Relaxed))
            .finish()
    }
}

impl Subscriber {
    /// Create a subscription with a bounded egress buffer. Returns the
    /// receiving end the socket task drains.
    pub fn new(
        channel: FeedChannel,
        filter: FeedFilter,
        buffer_size: usize,
    ) -> (Arc<Self>, mpsc::Receiver<FeedMessage>) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let subscriber = Arc::new(Self {
            id: Uuid::new_v4(),
            channel,
            filter,
            closed: CancellationToken::new(),
            sender,
            dropped_total: AtomicU64::new(0),
            window_dropped: AtomicU64::new(0),
            window_started: Mutex::new(Instant::now()),
            last_seen: Mutex::new(Instant::now()),
        });
        (subscriber, receiver)
    }

    /// Offer a message without blocking.
    ///
    /// A full buffer drops the message and counts it; a subscriber that
    /// keeps dropping past the configured threshold within the drop
    /// window is force-closed so it cannot pin hub memory.
    pub fn offer(&self, message: FeedMessage, config: &FanoutConfig) -> Offer {
        if self.closed.is_cancelled() {
            return Offer::Closed;
        }

        match self.sender.try_send(message) {
            Ok(()) => Offer::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped_total.fetch_add(1, Ordering::Relaxed);

                let mut window_started = self.window_started.lock();
                if window_started.elapsed() > Duration::from_secs(config.drop_window_secs) {
                    *window_started = Instant::now();
                    self.window_dropped.store(0, Ordering::Relaxed);
                }
                let in_window = self.window_dropped.fetch_add(1, Ordering::Relaxed) + 1;

                if in_window > config.drop_threshold {
                    self.closed.cancel();
                    return Offer::Closed;
                }
                Offer::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.closed.cancel();
                Offer::Closed
            }
        }
    }

    /// Record client activity (any inbound frame).
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the client was last heard from.
    pub fn idle(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Messages dropped for this subscriber so far.
    pub fn dropped(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }
}
