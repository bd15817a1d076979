//! Shared data models for the WikiPulse platform.
//!
//! Everything that crosses a process or wire boundary lives here: the
//! normalized [`Edit`] event, the raw upstream shape it is parsed from,
//! alert payloads, trending entries, and the WebSocket feed protocol.
//! The crate is deliberately free of I/O so every consumer (engine,
//! server, tooling) shares one definition of the domain.

pub mod alert;
pub mod edit;
pub mod feed;
pub mod trending;

pub use alert::{EditWarAlert, SpikeAlert, SpikeSeverity, WarSeverity};
pub use edit::{DropReason, Edit, EditKind, EditSummary, RawRecentChange};
pub use feed::{FeedFilter, FeedMessage};
pub use trending::TrendingEntry;
