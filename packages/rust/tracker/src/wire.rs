//! Wire types for the issue-tracker REST API.
//!
//! Only the fields the resolver and summarizer consume are modeled; the
//! tracker returns far more, all of it ignored by serde.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use triagesync_shared::{Ticket, TicketKey};

/// Paginated search response.
#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse {
    #[serde(default)]
    pub issues: Vec<RawIssue>,
    #[serde(rename = "startAt", default)]
    pub start_at: usize,
    #[serde(default)]
    pub total: usize,
}

/// One issue as returned by search or single-issue fetch.
#[derive(Debug, Deserialize)]
pub(crate) struct RawIssue {
    pub key: String,
    pub fields: RawFields,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawFields {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<RawStatus>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(rename = "resolutiondate", default)]
    pub resolution_date: Option<String>,
    #[serde(rename = "issuelinks", default)]
    pub issue_links: Vec<RawIssueLink>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawStatus {
    pub name: String,
}

/// One entry of the issue's link table.
#[derive(Debug, Deserialize)]
pub(crate) struct RawIssueLink {
    #[serde(rename = "type")]
    pub link_type: RawLinkType,
    /// Present when the linked issue points *at* this one
    /// ("is duplicated by" — a direct child).
    #[serde(rename = "inwardIssue", default)]
    pub inward_issue: Option<RawLinkedIssue>,
    /// Present when this issue points at the linked one
    /// ("duplicates" — disqualifies this issue as ultimate parent).
    #[serde(rename = "outwardIssue", default)]
    pub outward_issue: Option<RawLinkedIssue>,
}

impl RawIssueLink {
    /// Link types are operator-defined; match loosely the way the tracker UI
    /// names them ("Duplicate", "Duplicates", "duplicated by").
    pub fn is_duplicate(&self) -> bool {
        self.link_type.name.to_lowercase().contains("duplicat")
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawLinkType {
    pub name: String,
}

/// A linked issue stub embedded in the link table.
#[derive(Debug, Deserialize)]
pub(crate) struct RawLinkedIssue {
    pub key: String,
    #[serde(default)]
    pub fields: Option<RawLinkedFields>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawLinkedFields {
    #[serde(default)]
    pub summary: String,
}

impl RawIssue {
    /// Convert to the domain snapshot type.
    pub fn into_ticket(self) -> Ticket {
        Ticket {
            key: TicketKey::from(self.key),
            title: self.fields.summary,
            description: self.fields.description,
            status: self.fields.status.map(|s| s.name),
            created: self.fields.created.as_deref().and_then(parse_timestamp),
            resolved: self
                .fields
                .resolution_date
                .as_deref()
                .and_then(parse_timestamp),
        }
    }
}

impl RawLinkedIssue {
    pub fn into_ticket(self) -> Ticket {
        let title = self.fields.map(|f| f.summary).unwrap_or_default();
        Ticket::new(self.key, title)
    }
}

/// Parse tracker timestamps; both RFC 3339 and the legacy
/// `2024-01-15T10:30:00.000+0000` format occur in the wild.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.3f%z"))
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| debug!(raw, error = %e, "unparseable tracker timestamp"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_deserializes_and_converts() {
        let json = r#"{
            "key": "FEED-1",
            "fields": {
                "summary": "Checkout fails on retry",
                "status": {"name": "Open"},
                "created": "2024-01-15T10:30:00.000+0000",
                "issuelinks": [
                    {
                        "type": {"name": "Duplicate"},
                        "inwardIssue": {"key": "FEED-7", "fields": {"summary": "dupe"}}
                    },
                    {
                        "type": {"name": "Blocks"},
                        "outwardIssue": {"key": "FEED-9"}
                    }
                ]
            }
        }"#;
        let raw: RawIssue = serde_json::from_str(json).expect("deserialize issue");
        assert_eq!(raw.fields.issue_links.len(), 2);
        assert!(raw.fields.issue_links[0].is_duplicate());
        assert!(!raw.fields.issue_links[1].is_duplicate());

        let ticket = raw.into_ticket();
        assert_eq!(ticket.key.as_str(), "FEED-1");
        assert_eq!(ticket.status.as_deref(), Some("Open"));
        assert!(ticket.created.is_some());
    }

    #[test]
    fn timestamp_formats() {
        assert!(parse_timestamp("2024-01-15T10:30:00.000+0000").is_some());
        assert!(parse_timestamp("2024-01-15T10:30:00+00:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
