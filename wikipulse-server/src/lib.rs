//! # WikiPulse Server
//!
//! Shared plumbing for the three WikiPulse binaries:
//!
//! - **api-host** — the live fan-out surface: WebSocket feed/alert
//!   streams, the trending leaderboard and alert/stat read APIs.
//! - **ingestor** — upstream event-stream client feeding the
//!   partitioned log.
//! - **processor** — the detector consumers and background sweeps.

/// Common CLI arguments and process bootstrap.
pub mod bootstrap;

/// Error types and handling.
pub mod errors;

/// HTTP handlers.
pub mod handlers;

/// Connection rate limiting.
pub mod middleware;

/// Route organization.
pub mod routes;

/// Shared application state.
pub mod state;

/// WebSocket fan-out.
pub mod websocket;
