//! The normalized edit event and the raw upstream shape it is parsed from.

use serde::{Deserialize, Serialize};

/// Byte-change magnitude above which an edit is considered significant.
pub const SIGNIFICANT_BYTES: i64 = 100;

/// Maximum tolerated clock skew for upstream timestamps, in seconds.
pub const MAX_FUTURE_SKEW_SECS: i64 = 3600;

/// Timestamps at or above this value are interpreted as milliseconds.
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Kind of change an [`Edit`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditKind {
    /// Modification of an existing page.
    Edit,
    /// Creation of a new page.
    New,
    /// A log action (deletion, protection, ...).
    Log,
}

/// One Wikipedia page modification event, normalized from the upstream
/// recent-changes stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edit {
    /// Monotone id assigned by the upstream stream.
    pub id: u64,
    /// What kind of change this is.
    pub kind: EditKind,
    /// Page title.
    pub title: String,
    /// Username or IP of the editor.
    pub user: String,
    /// Whether the editing account is flagged as a bot.
    pub bot: bool,
    /// Wiki identifier, e.g. `enwiki`.
    pub wiki: String,
    /// Base URL of the wiki the edit happened on.
    pub server_url: String,
    /// Event time, epoch seconds.
    pub timestamp: i64,
    /// Page length before the edit, bytes.
    pub length_old: i64,
    /// Page length after the edit, bytes.
    pub length_new: i64,
    /// Revision id before the edit (0 for new pages).
    pub revision_old: u64,
    /// Revision id after the edit.
    pub revision_new: u64,
    /// Edit summary left by the editor.
    pub comment: String,
}

impl Edit {
    /// Net byte change of the edit.
    pub fn byte_change(&self) -> i64 {
        self.length_new - self.length_old
    }

    /// Language code derived from the wiki identifier (`enwiki` -> `en`).
    pub fn language(&self) -> &str {
        self.wiki.strip_suffix("wiki").unwrap_or(&self.wiki)
    }

    /// Whether the edit changed more than [`SIGNIFICANT_BYTES`] bytes.
    pub fn is_significant(&self) -> bool {
        self.byte_change().abs() > SIGNIFICANT_BYTES
    }
}

/// Why an upstream event was rejected at the ingestion boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Payload was not valid JSON or not an object.
    Malformed,
    /// `wiki` missing or empty.
    InvalidWiki,
    /// Timestamp further than [`MAX_FUTURE_SKEW_SECS`] in the future.
    ClockSkew,
    /// `title` missing or empty.
    MissingTitle,
    /// `user` missing or empty.
    MissingUser,
    /// `timestamp` missing.
    MissingTimestamp,
    /// Change type other than edit/new/log.
    UnsupportedKind,
}

impl DropReason {
    /// Stable label used for counters and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::InvalidWiki => "invalid_wiki",
            Self::ClockSkew => "clock_skew",
            Self::MissingTitle => "missing_title",
            Self::MissingUser => "missing_user",
            Self::MissingTimestamp => "missing_timestamp",
            Self::UnsupportedKind => "unsupported_kind",
        }
    }

    /// All reasons, in counter-reporting order.
    pub fn all() -> &'static [DropReason] {
        &[
            Self::Malformed,
            Self::InvalidWiki,
            Self::ClockSkew,
            Self::MissingTitle,
            Self::MissingUser,
            Self::MissingTimestamp,
            Self::UnsupportedKind,
        ]
    }
}

/// Nested `length` object on the upstream payload.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RawLength {
    /// Length before the change; absent for page creations.
    pub old: Option<i64>,
    /// Length after the change.
    pub new: Option<i64>,
}

/// Nested `revision` object on the upstream payload.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RawRevision {
    /// Revision id before the change; absent for page creations.
    pub old: Option<u64>,
    /// Revision id after the change.
    pub new: Option<u64>,
}

/// The upstream recent-changes payload as delivered on the event stream.
///
/// Every field is optional; validation happens in [`Edit::from_raw`].
/// Unknown fields are ignored by serde.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRecentChange {
    /// Upstream event id.
    pub id: Option<u64>,
    /// Change type string (`edit`, `new`, `log`, `categorize`, ...).
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Page title.
    pub title: Option<String>,
    /// Editor username or IP.
    pub user: Option<String>,
    /// Bot flag.
    pub bot: Option<bool>,
    /// Wiki identifier.
    pub wiki: Option<String>,
    /// Wiki base URL.
    pub server_url: Option<String>,
    /// Event time; seconds or milliseconds depending on the producer.
    pub timestamp: Option<i64>,
    /// Page length before/after.
    pub length: Option<RawLength>,
    /// Revision ids before/after.
    pub revision: Option<RawRevision>,
    /// Edit summary.
    pub comment: Option<String>,
}

impl Edit {
    /// Validate and normalize a raw upstream payload.
    ///
    /// `now` is the caller's epoch-seconds clock, injected so skew checks
    /// are deterministic under test. Timestamps that look like epoch
    /// milliseconds are normalized down to seconds before validation.
    pub fn from_raw(raw: RawRecentChange, now: i64) -> Result<Edit, DropReason> {
        let kind = match raw.kind.as_deref() {
            Some("edit") => EditKind::Edit,
            Some("new") => EditKind::New,
            Some("log") => EditKind::Log,
            _ => return Err(DropReason::UnsupportedKind),
        };

        let wiki = match raw.wiki {
            Some(w) if !w.is_empty() => w,
            _ => return Err(DropReason::InvalidWiki),
        };

        let title = match raw.title {
            Some(t) if !t.is_empty() => t,
            _ => return Err(DropReason::MissingTitle),
        };

        let user = match raw.user {
            Some(u) if !u.is_empty() => u,
            _ => return Err(DropReason::MissingUser),
        };

        let timestamp = match raw.timestamp {
            Some(ts) if ts >= MILLIS_THRESHOLD => ts / 1000,
            Some(ts) => ts,
            None => return Err(DropReason::MissingTimestamp),
        };

        if timestamp > now + MAX_FUTURE_SKEW_SECS {
            return Err(DropReason::ClockSkew);
        }

        let length = raw.length.unwrap_or_default();
        let revision = raw.revision.unwrap_or_default();

        Ok(Edit {
            id: raw.id.unwrap_or(0),
            kind,
            title,
            user,
            bot: raw.bot.unwrap_or(false),
            wiki,
            server_url: raw.server_url.unwrap_or_default(),
            timestamp,
            length_old: length.old.unwrap_or(0),
            length_new: length.new.unwrap_or(0),
            revision_old: revision.old.unwrap_or(0),
            revision_new: revision.new.unwrap_or(0),
            comment: raw.comment.unwrap_or_default(),
        })
    }
}

/// Compact per-edit record kept in a hot page's recent-edits ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditSummary {
    /// Editor username or IP.
    pub user: String,
    /// Edit time, epoch seconds.
    pub timestamp: i64,
    /// Revision id before the edit.
    pub revision_old: u64,
    /// Revision id after the edit.
    pub revision_new: u64,
    /// Whether the edit looked like a revert.
    pub is_revert: bool,
}

impl EditSummary {
    /// Build a ring entry from a full edit. Revert detection happens in
    /// the edit-war detector, which sees the whole ring.
    pub fn from_edit(edit: &Edit) -> Self {
        Self {
            user: edit.user.clone(),
            timestamp: edit.timestamp,
            revision_old: edit.revision_old,
            revision_new: edit.revision_new,
            is_revert: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(title: &str, wiki: &str, ts: i64) -> RawRecentChange {
        RawRecentChange {
            id: Some(1),
            kind: Some("edit".to_string()),
            title: Some(title.to_string()),
            user: Some("Alice".to_string()),
            bot: Some(false),
            wiki: Some(wiki.to_string()),
            server_url: Some("https://en.wikipedia.org".to_string()),
            timestamp: Some(ts),
            length: Some(RawLength {
                old: Some(1000),
                new: Some(1050),
            }),
            revision: Some(RawRevision {
                old: Some(10),
                new: Some(11),
            }),
            comment: Some("copyedit".to_string()),
        }
    }

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn parses_well_formed_event() {
        let edit = Edit::from_raw(raw("Rust", "enwiki", NOW - 5), NOW).unwrap();
        assert_eq!(edit.title, "Rust");
        assert_eq!(edit.byte_change(), 50);
        assert_eq!(edit.language(), "en");
        assert_eq!(edit.revision_new, 11);
    }

    #[test]
    fn empty_wiki_is_invalid() {
        let err = Edit::from_raw(raw("Rust", "", NOW), NOW).unwrap_err();
        assert_eq!(err, DropReason::InvalidWiki);
        assert_eq!(err.as_str(), "invalid_wiki");
    }

    #[test]
    fn future_timestamp_is_clock_skew() {
        let err = Edit::from_raw(raw("Rust", "enwiki", NOW + 3601), NOW).unwrap_err();
        assert_eq!(err, DropReason::ClockSkew);
        // Exactly one hour ahead is still tolerated.
        assert!(Edit::from_raw(raw("Rust", "enwiki", NOW + 3600), NOW).is_ok());
    }

    #[test]
    fn millisecond_timestamps_are_normalized() {
        let edit = Edit::from_raw(raw("Rust", "enwiki", (NOW - 5) * 1000), NOW).unwrap();
        assert_eq!(edit.timestamp, NOW - 5);
    }

    #[test]
    fn categorize_events_are_unsupported() {
        let mut r = raw("Rust", "enwiki", NOW);
        r.kind = Some("categorize".to_string());
        assert_eq!(
            Edit::from_raw(r, NOW).unwrap_err(),
            DropReason::UnsupportedKind
        );
    }

    #[test]
    fn missing_user_is_dropped() {
        let mut r = raw("Rust", "enwiki", NOW);
        r.user = None;
        assert_eq!(Edit::from_raw(r, NOW).unwrap_err(), DropReason::MissingUser);
    }

    #[test]
    fn significance_boundary_is_exclusive() {
        let mut edit = Edit::from_raw(raw("Rust", "enwiki", NOW), NOW).unwrap();
        edit.length_old = 0;
        edit.length_new = 100;
        assert!(!edit.is_significant());
        edit.length_new = 101;
        assert!(edit.is_significant());
        edit.length_new = -101;
        assert!(edit.is_significant());
        edit.length_new = 0;
        assert!(!edit.is_significant());
    }

    #[test]
    fn language_of_non_wiki_suffix_is_identity() {
        let mut edit = Edit::from_raw(raw("Rust", "wikidatawiki", NOW), NOW).unwrap();
        assert_eq!(edit.language(), "wikidata");
        edit.wiki = "commons".to_string();
        assert_eq!(edit.language(), "commons");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let json = format!(
            r#"{{"id":9,"type":"edit","title":"T","user":"U","wiki":"dewiki",
                "timestamp":{},"extra_field":{{"nested":true}},"namespace":0}}"#,
            NOW
        );
        let raw: RawRecentChange = serde_json::from_str(&json).unwrap();
        let edit = Edit::from_raw(raw, NOW).unwrap();
        assert_eq!(edit.wiki, "dewiki");
        assert_eq!(edit.length_old, 0);
    }
}
