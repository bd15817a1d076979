//! WebSocket feed protocol: the tagged message envelope and the
//! per-subscription filter predicate.

use crate::alert::{EditWarAlert, SpikeAlert};
use crate::edit::Edit;
use serde::{Deserialize, Serialize};

/// Message delivered to live feed subscribers.
///
/// Serializes as `{"type": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum FeedMessage {
    /// A live edit on the `edits` channel.
    Edit(Edit),
    /// A traffic spike on the `alerts` channel.
    Spike(SpikeAlert),
    /// An edit war on the `alerts` channel.
    EditWar(EditWarAlert),
}

impl FeedMessage {
    /// Whether this message belongs on the alerts channel.
    pub fn is_alert(&self) -> bool {
        matches!(self, Self::Spike(_) | Self::EditWar(_))
    }
}

/// Filter predicate attached to a feed subscription.
///
/// Unset fields match everything. Alerts are never filtered; the filter
/// applies to live edits only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedFilter {
    /// Only edits whose wiki language matches, e.g. `en`.
    pub language: Option<String>,
    /// Only edits on this wiki, e.g. `enwiki`.
    pub wiki: Option<String>,
    /// Only edits with at least this absolute byte change.
    pub min_bytes: Option<i64>,
    /// Drop edits made by bot accounts.
    #[serde(default)]
    pub exclude_bots: bool,
}

impl FeedFilter {
    /// Whether an edit passes the filter.
    pub fn matches(&self, edit: &Edit) -> bool {
        if self.exclude_bots && edit.bot {
            return false;
        }
        if let Some(lang) = &self.language
            && edit.language() != lang
        {
            return false;
        }
        if let Some(wiki) = &self.wiki
            && edit.wiki != *wiki
        {
            return false;
        }
        if let Some(min) = self.min_bytes
            && edit.byte_change().abs() < min
        {
            return false;
        }
        true
    }
}
