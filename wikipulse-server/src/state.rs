use crate::websocket::FanoutHub;
use std::sync::Arc;
use wikipulse_config::Config;
use wikipulse_core::store::Store;
use wikipulse_core::trending::TrendingScorer;

/// Shared state for the api-host handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub hub: Arc<FanoutHub>,
    pub trending: Arc<TrendingScorer>,
    pub config: Arc<Config>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("subscribers", &self.hub.subscriber_count())
            .field("started_at", &self.started_at)
            .finish()
    }
}
