//! Issue-tracker REST client.
//!
//! Fetches candidate parent tickets (paginated search) and per-ticket
//! duplicate-link expansions. All calls retry transient failures with
//! bounded exponential backoff; exhaustion surfaces as a
//! [`SyncError::Tracker`] fetch error, which aborts the run before any
//! knowledge-base mutation.

mod wire;

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use triagesync_shared::{
    DuplicateLinks, Result, RetryPolicy, SyncError, Ticket, TicketKey, TrackerConfig,
};

use crate::wire::{RawIssue, SearchResponse};

/// User-Agent string for tracker requests.
const USER_AGENT: &str = concat!("triagesync/", env!("CARGO_PKG_VERSION"));

/// Fields requested for full ticket snapshots.
const TICKET_FIELDS: &str = "summary,description,status,created,resolutiondate";

/// Fields requested for link expansion.
const LINK_FIELDS: &str = "summary,issuelinks";

// ---------------------------------------------------------------------------
// Link expansion result
// ---------------------------------------------------------------------------

/// Duplicate links of one ticket, plus snapshot stubs for the linked tickets
/// embedded in the link table (enough for prompts without extra fetches).
#[derive(Debug, Clone, Default)]
pub struct LinkExpansion {
    pub links: DuplicateLinks,
    pub tickets: Vec<Ticket>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// REST client for the issue tracker.
pub struct TrackerClient {
    http: Client,
    base_url: String,
    username: String,
    token: String,
    parent_query: String,
    page_size: usize,
    retry: RetryPolicy,
}

/// Read the tracker API token from the env var named in config.
pub fn token_from_env(config: &TrackerConfig) -> Result<String> {
    std::env::var(&config.token_env).map_err(|_| {
        SyncError::config(format!(
            "tracker API token not found. Set the {} environment variable.",
            config.token_env
        ))
    })
}

impl TrackerClient {
    /// Create a new client. The token is passed explicitly so tests can
    /// construct clients without touching the process environment; see
    /// [`token_from_env`].
    pub fn new(config: &TrackerConfig, token: String, retry: RetryPolicy) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| SyncError::Tracker(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            token,
            parent_query: config.parent_query.clone(),
            page_size: config.page_size.max(1),
            retry,
        })
    }

    /// Browser-facing URL for a ticket, used as the citation link on
    /// published knowledge entries.
    pub fn browse_url(&self, key: &TicketKey) -> String {
        format!("{}/browse/{key}", self.base_url)
    }

    /// Fetch every ticket matching the configured parent query, walking all
    /// result pages. The caller sees one flat list; pagination never leaks.
    #[instrument(skip_all)]
    pub async fn fetch_candidate_tickets(&self) -> Result<Vec<Ticket>> {
        let mut tickets = Vec::new();
        let mut start_at = 0usize;

        loop {
            let url = format!("{}/rest/api/2/search", self.base_url);
            let page: SearchResponse = self
                .get_json(
                    &url,
                    &[
                        ("jql", self.parent_query.as_str()),
                        ("startAt", &start_at.to_string()),
                        ("maxResults", &self.page_size.to_string()),
                        ("fields", TICKET_FIELDS),
                    ],
                )
                .await?;

            let fetched = page.issues.len();
            debug!(start_at = page.start_at, fetched, total = page.total, "search page");
            tickets.extend(page.issues.into_iter().map(RawIssue::into_ticket));

            if fetched < self.page_size {
                break;
            }
            start_at += fetched;
        }

        info!(count = tickets.len(), "fetched candidate tickets");
        Ok(tickets)
    }

    /// Fetch one ticket's duplicate links, split into outward (tickets it
    /// duplicates) and inward (tickets duplicating it).
    pub async fn fetch_duplicate_links(&self, key: &TicketKey) -> Result<LinkExpansion> {
        let url = format!("{}/rest/api/2/issue/{key}", self.base_url);
        let issue: RawIssue = self.get_json(&url, &[("fields", LINK_FIELDS)]).await?;

        let mut expansion = LinkExpansion::default();
        for link in issue.fields.issue_links {
            if !link.is_duplicate() {
                continue;
            }
            if let Some(inward) = link.inward_issue {
                expansion.links.inward.push(TicketKey::from(inward.key.as_str()));
                expansion.tickets.push(inward.into_ticket());
            }
            if let Some(outward) = link.outward_issue {
                expansion.links.outward.push(TicketKey::from(outward.key.as_str()));
                expansion.tickets.push(outward.into_ticket());
            }
        }

        debug!(
            %key,
            inward = expansion.links.inward.len(),
            outward = expansion.links.outward.len(),
            "expanded duplicate links"
        );
        Ok(expansion)
    }

    /// Fetch a single ticket snapshot by key (test-update mode).
    pub async fn fetch_ticket(&self, key: &TicketKey) -> Result<Ticket> {
        let url = format!("{}/rest/api/2/issue/{key}", self.base_url);
        let issue: RawIssue = self.get_json(&url, &[("fields", TICKET_FIELDS)]).await?;
        Ok(issue.into_ticket())
    }

    /// Verify credentials by fetching the authenticated user.
    pub async fn test_connection(&self) -> Result<String> {
        #[derive(serde::Deserialize)]
        struct Myself {
            #[serde(default)]
            name: String,
            #[serde(rename = "displayName", default)]
            display_name: String,
        }

        let url = format!("{}/rest/api/2/myself", self.base_url);
        let me: Myself = self.get_json(&url, &[]).await?;
        let who = if me.display_name.is_empty() {
            me.name
        } else {
            me.display_name
        };
        info!(user = %who, "tracker connection verified");
        Ok(who)
    }

    /// GET with basic auth, bounded retry on transient failures, and JSON
    /// decoding into `T`.
    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        let mut last_error = String::new();

        for attempt in 1..=self.retry.attempts {
            let response = self
                .http
                .get(url)
                .basic_auth(&self.username, Some(&self.token))
                .query(query)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .json::<T>()
                        .await
                        .map_err(|e| SyncError::Tracker(format!("malformed response from {url}: {e}")));
                }
                Ok(resp) if is_transient(resp.status()) => {
                    last_error = format!("HTTP {} from {url}", resp.status());
                }
                Ok(resp) => {
                    // Client errors are not retryable.
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(SyncError::Tracker(format!(
                        "HTTP {status} from {url}: {body}"
                    )));
                }
                Err(e) => {
                    last_error = format!("request to {url} failed: {e}");
                }
            }

            if attempt < self.retry.attempts {
                let delay = self.retry.delay_for(attempt);
                warn!(attempt, max = self.retry.attempts, error = %last_error, ?delay, "retrying tracker call");
                tokio::time::sleep(delay).await;
            }
        }

        Err(SyncError::Tracker(format!(
            "giving up after {} attempts: {last_error}",
            self.retry.attempts
        )))
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}
