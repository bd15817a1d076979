//! WebSocket upgrade handlers and the per-connection socket tasks.

use crate::errors::AppError;
use crate::middleware::check_connect_rate;
use crate::state::AppState;
use crate::websocket::{FeedChannel, Subscriber, feed_to_websocket};
use axum::{
    extract::{
        ConnectInfo, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;
use wikipulse_config::FanoutConfig;
use wikipulse_model::{FeedFilter, FeedMessage};

/// Cadence of the liveness check inside the egress task.
const LIVENESS_TICK: Duration = Duration::from_secs(5);

/// Query parameters accepted on `/ws/feed`.
#[derive(Debug, Default, Deserialize)]
pub struct FeedParams {
    pub language: Option<String>,
    pub wiki: Option<String>,
    #[serde(default)]
    pub exclude_bots: bool,
    pub min_bytes: Option<i64>,
}

impl From<FeedParams> for FeedFilter {
    fn from(params: FeedParams) -> Self {
        FeedFilter {
            language: params.language,
            wiki: params.wiki,
            min_bytes: params.min_bytes,
            exclude_bots: params.exclude_bots,
        }
    }
}

/// Handle a `/ws/feed` upgrade.
pub async fn feed_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<FeedParams>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    check_connect_rate(&state.store, addr.ip(), state.config.fanout.connects_per_minute).await?;
    let filter = FeedFilter::from(params);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, FeedChannel::Edits, filter)))
}

/// Handle a `/ws/alerts` upgrade. Alerts carry no filter.
pub async fn alerts_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    check_connect_rate(&state.store, addr.ip(), state.config.fanout.connects_per_minute).await?;
    Ok(ws.on_upgrade(move |socket| {
        handle_socket(socket, state, FeedChannel::Alerts, FeedFilter::default())
    }))
}

/// Drive one WebSocket connection for its lifetime.
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    channel: FeedChannel,
    filter: FeedFilter,
) {
    let (subscriber, receiver) = state.hub.subscribe(channel, filter);
    let (ws_sender, mut ws_receiver) = socket.split();

    let egress = tokio::spawn(egress_loop(
        ws_sender,
        receiver,
        subscriber.clone(),
        state.hub.config().clone(),
    ));

    // Ingress: every frame from the client counts as liveness.
    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Close(_)) => break,
            Ok(_) => subscriber.touch(),
            Err(e) => {
                debug!("subscriber {} socket error: {}", subscriber.id, e);
                break;
            }
        }
    }

    subscriber.closed.cancel();
    let _ = egress.await;
    state.hub.unsubscribe(subscriber.id);
}

/// Egress: drain the subscription buffer into the socket, pinging idle
/// clients and closing the ones that stop responding.
async fn egress_loop(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut receiver: mpsc::Receiver<FeedMessage>,
    subscriber: Arc<Subscriber>,
    config: FanoutConfig,
) {
    let idle_ping = Duration::from_secs(config.idle_ping_secs);
    let idle_close = idle_ping + Duration::from_secs(config.pong_grace_secs);
    let mut liveness = tokio::time::interval(LIVENESS_TICK);

    loop {
        tokio::select! {
            _ = subscriber.closed.cancelled() => {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
            message = receiver.recv() => {
                let Some(message) = message else { break };
                let Ok(frame) = feed_to_websocket(&message) else { continue };
                if ws_sender.send(frame).await.is_err() {
                    subscriber.closed.cancel();
                    break;
                }
            }
            _ = liveness.tick() => {
                let idle = subscriber.idle();
                if idle >= idle_close {
                    debug!("subscriber {} unresponsive, closing", subscriber.id);
                    let _ = ws_sender.send(Message::Close(None)).await;
                    subscriber.closed.cancel();
                    break;
                }
                if idle >= idle_ping
                    && ws_sender.send(Message::Ping(Vec::new().into())).await.is_err()
                {
                    subscriber.closed.cancel();
                    break;
                }
            }
        }
    }
}
