//! Liveness and readiness endpoints.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};
use wikipulse_core::store::Store;

/// `GET /healthz` — process liveness.
pub async fn healthz() -> &'static str {
    "ok"
}

/// `GET /readyz` — per-component readiness. Degrades to 503 when the
/// shared store is unreachable; the fan-out hub itself has no failure
/// mode worth reporting beyond its subscriber count.
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let store_ok = state.store.exists("readyz:probe").await.is_ok();

    let body = json!({
        "status": if store_ok { "ready" } else { "degraded" },
        "components": {
            "store": if store_ok { "up" } else { "down" },
            "fanout_subscribers": state.hub.subscriber_count(),
        },
        "uptime_secs": (chrono::Utc::now() - state.started_at).num_seconds(),
    });

    let status = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}
