//! Core domain types for the triagesync ticket hierarchy and publish ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version for the tracking database.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// TicketKey
// ---------------------------------------------------------------------------

/// A stable, unique ticket identifier (e.g. `FEED-1234`).
///
/// Ordering is lexicographic; it is the tiebreaker for ranking candidates
/// with equal descendant counts, so it must stay total and stable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketKey(pub String);

impl TicketKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TicketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TicketKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TicketKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// Ticket & duplicate links
// ---------------------------------------------------------------------------

/// An immutable snapshot of one ticket, re-fetched each resolver run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    /// Stable unique identifier.
    pub key: TicketKey,
    /// One-line title/summary field.
    pub title: String,
    /// Longer body text, when the tracker exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Workflow status name (e.g. "Open", "Resolved").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// When the ticket was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    /// When the ticket was resolved, if it has been.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Minimal snapshot with just a key and title.
    pub fn new(key: impl Into<TicketKey>, title: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            description: None,
            status: None,
            created: None,
            resolved: None,
        }
    }
}

/// A directed duplicate relation: `source` duplicates `target`.
///
/// The target is the more "ultimate" ticket; the source is subordinate to it
/// and becomes part of the target's descendant set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DuplicateLink {
    pub source: TicketKey,
    pub target: TicketKey,
}

impl DuplicateLink {
    pub fn new(source: impl Into<TicketKey>, target: impl Into<TicketKey>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Per-ticket duplicate-link expansion as returned by the ticket source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplicateLinks {
    /// Tickets this one duplicates (disqualify it as ultimate parent).
    pub outward: Vec<TicketKey>,
    /// Tickets duplicating this one (its direct children).
    pub inward: Vec<TicketKey>,
}

// ---------------------------------------------------------------------------
// PublishedRecord
// ---------------------------------------------------------------------------

/// Lifecycle state of one published knowledge entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    /// Publish decided but not yet confirmed by the backend.
    Pending,
    /// Live in the remote knowledge base.
    Published,
    /// Last backend operation failed; retried on the next run.
    Failed,
    /// Retracted from the remote knowledge base.
    Retired,
}

impl PublishStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Published => "published",
            Self::Failed => "failed",
            Self::Retired => "retired",
        }
    }
}

impl std::str::FromStr for PublishStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "published" => Ok(Self::Published),
            "failed" => Ok(Self::Failed),
            "retired" => Ok(Self::Retired),
            other => Err(format!("unknown publish status: {other}")),
        }
    }
}

impl std::fmt::Display for PublishStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted state of one ultimate parent currently (or formerly) represented
/// in the remote knowledge base. Owned exclusively by the reconciliation
/// engine; the hierarchy resolver never reads or writes these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedRecord {
    /// Ultimate parent ticket this entry represents.
    pub ticket_key: TicketKey,
    /// Descendant count at the time of the last successful publish.
    pub descendant_count: usize,
    /// Fingerprint of the descendant-set composition at last publish.
    pub fingerprint: String,
    /// Lifecycle status.
    pub status: PublishStatus,
    /// Backend-side reference (document or entry id) needed for retraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ref: Option<String>,
    /// The summary text last accepted by the publishing backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Why the last operation failed, when status is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the entry last went live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// Last state transition.
    pub updated_at: DateTime<Utc>,
}

impl PublishedRecord {
    /// Whether this record counts as "currently published" when diffing.
    ///
    /// `failed` and `pending` rows are invisible to the diff so the next
    /// update naturally retries them as additions; `retired` rows are gone.
    pub fn is_active(&self) -> bool {
        self.status == PublishStatus::Published
    }
}

// ---------------------------------------------------------------------------
// Run history
// ---------------------------------------------------------------------------

/// One reconciliation run, persisted for the `status` query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRunSummary {
    /// Run identifier (UUID v7, time-sortable).
    pub id: String,
    /// Mode name: init, update, resize, force-refresh, test-update.
    pub mode: String,
    /// Effective target size, when the mode has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_size: Option<usize>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Serialized execution report, once the run finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_key_ordering_is_lexicographic() {
        let mut keys = vec![
            TicketKey::from("FEED-20"),
            TicketKey::from("FEED-100"),
            TicketKey::from("FEED-3"),
        ];
        keys.sort();
        // Lexicographic, not numeric: documented tiebreak behavior.
        assert_eq!(
            keys.iter().map(TicketKey::as_str).collect::<Vec<_>>(),
            vec!["FEED-100", "FEED-20", "FEED-3"]
        );
    }

    #[test]
    fn publish_status_roundtrip() {
        for status in [
            PublishStatus::Pending,
            PublishStatus::Published,
            PublishStatus::Failed,
            PublishStatus::Retired,
        ] {
            let parsed: PublishStatus = status.as_str().parse().expect("parse status");
            assert_eq!(parsed, status);
        }
        assert!("archived".parse::<PublishStatus>().is_err());
    }

    #[test]
    fn active_records_are_published_only() {
        let mut record = PublishedRecord {
            ticket_key: TicketKey::from("FEED-1"),
            descendant_count: 4,
            fingerprint: "abc".into(),
            status: PublishStatus::Published,
            remote_ref: Some("doc-1".into()),
            summary: None,
            last_error: None,
            published_at: Some(Utc::now()),
            updated_at: Utc::now(),
        };
        assert!(record.is_active());

        for status in [
            PublishStatus::Pending,
            PublishStatus::Failed,
            PublishStatus::Retired,
        ] {
            record.status = status;
            assert!(!record.is_active());
        }
    }

    #[test]
    fn ticket_serialization_skips_empty_fields() {
        let ticket = Ticket::new("FEED-9", "Login button unresponsive");
        let json = serde_json::to_string(&ticket).expect("serialize");
        assert!(!json.contains("description"));
        assert!(!json.contains("resolved"));

        let parsed: Ticket = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.key.as_str(), "FEED-9");
    }
}
