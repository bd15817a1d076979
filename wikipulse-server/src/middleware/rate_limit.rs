//! Per-IP connect rate limiting for the WebSocket endpoints.
//!
//! The live streams are unauthenticated, so a fixed-window counter in
//! the shared store is the only gate on connection churn.

use crate::errors::AppError;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use wikipulse_core::store::{Store, keys};

/// Fixed-window length for connect counting.
const WINDOW: Duration = Duration::from_secs(60);

/// Count a connection attempt from `ip`, rejecting it once the per-IP
/// budget for the current window is spent.
pub async fn check_connect_rate(
    store: &Arc<dyn Store>,
    ip: IpAddr,
    connects_per_minute: u64,
) -> Result<(), AppError> {
    let key = keys::connect_rate(&ip.to_string());
    let count = store.incr_with_ttl(&key, WINDOW).await?;
    if count > connects_per_minute {
        debug!("rate limiting {} ({} connects this window)", ip, count);
        return Err(AppError::rate_limited(
            "too many connection attempts; retry later",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wikipulse_core::store::MemoryStore;

    #[tokio::test]
    async fn budget_is_enforced_per_window() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let ip: IpAddr = "203.0.113.9".parse().unwrap();

        for _ in 0..3 {
            assert!(check_connect_rate(&store, ip, 3).await.is_ok());
        }
        assert!(check_connect_rate(&store, ip, 3).await.is_err());

        // A different address has its own budget.
        let other: IpAddr = "203.0.113.10".parse().unwrap();
        assert!(check_connect_rate(&store, other, 3).await.is_ok());
    }

    #[tokio::test]
    async fn budget_resets_with_the_window() {
        let memory = Arc::new(MemoryStore::new());
        let store: Arc<dyn Store> = memory.clone();
        let ip: IpAddr = "203.0.113.9".parse().unwrap();

        assert!(check_connect_rate(&store, ip, 1).await.is_ok());
        assert!(check_connect_rate(&store, ip, 1).await.is_err());

        memory.advance(Duration::from_secs(61));
        assert!(check_connect_rate(&store, ip, 1).await.is_ok());
    }
}
