//! Route table for the api-host.

use crate::handlers::{api, feed, health};
use crate::state::AppState;
use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the api-host router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/feed", get(feed::feed_handler))
        .route("/ws/alerts", get(feed::alerts_handler))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/api/trending", get(api::trending))
        .route("/api/alerts/spikes", get(api::spike_alerts))
        .route("/api/alerts/wars", get(api::war_alerts))
        .route("/api/stats/languages", get(api::language_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
