//! Read APIs: trending leaderboard, recent alerts, language stats.

use crate::errors::{AppError, AppResult};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;
use wikipulse_core::store::{Store, keys};
use wikipulse_model::{EditWarAlert, SpikeAlert, TrendingEntry};

#[derive(Debug, Deserialize)]
pub struct TrendingParams {
    pub limit: Option<u64>,
}

/// `GET /api/trending?limit=K` — the current leaderboard.
pub async fn trending(
    Query(params): Query<TrendingParams>,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<TrendingEntry>>> {
    let cap = state.config.trending.max_pages;
    let limit = params.limit.unwrap_or(25).min(cap);
    let now = chrono::Utc::now().timestamp();
    let entries = state.trending.leaderboard(limit, now).await?;
    Ok(Json(entries))
}

/// `GET /api/alerts/spikes` — most recent spike alerts, newest first.
pub async fn spike_alerts(State(state): State<AppState>) -> AppResult<Json<Vec<SpikeAlert>>> {
    Ok(Json(read_alerts(&state, keys::ALERTS_SPIKE).await?))
}

/// `GET /api/alerts/wars` — most recent edit-war alerts, newest first.
pub async fn war_alerts(State(state): State<AppState>) -> AppResult<Json<Vec<EditWarAlert>>> {
    Ok(Json(read_alerts(&state, keys::ALERTS_WAR).await?))
}

async fn read_alerts<T: serde::de::DeserializeOwned>(
    state: &AppState,
    key: &str,
) -> Result<Vec<T>, AppError> {
    let raw = state.store.list_range(key, 0, -1).await?;
    let mut alerts = Vec::with_capacity(raw.len());
    for entry in raw {
        match serde_json::from_str(&entry) {
            Ok(alert) => alerts.push(alert),
            Err(e) => warn!("skipping undecodable alert in {}: {}", key, e),
        }
    }
    Ok(alerts)
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    /// Day to report, `YYYY-MM-DD`; defaults to today (UTC).
    pub date: Option<String>,
}

/// `GET /api/stats/languages?date=YYYY-MM-DD` — per-language edit
/// counts for one day.
pub async fn language_stats(
    Query(params): Query<StatsParams>,
    State(state): State<AppState>,
) -> AppResult<Json<Value>> {
    let date = match params.date {
        Some(date) => {
            chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|_| AppError::bad_request("date must be YYYY-MM-DD"))?;
            date
        }
        None => chrono::Utc::now().format("%Y-%m-%d").to_string(),
    };

    let mut counts = state.store.hash_get_all(&keys::language_stats(&date)).await?;
    counts.sort_by(|a, b| {
        let left: i64 = a.1.parse().unwrap_or(0);
        let right: i64 = b.1.parse().unwrap_or(0);
        right.cmp(&left)
    });

    let languages: Vec<Value> = counts
        .into_iter()
        .map(|(language, count)| {
            json!({
                "language": language,
                "edits": count.parse::<i64>().unwrap_or(0),
            })
        })
        .collect();

    Ok(Json(json!({ "date": date, "languages": languages })))
}
