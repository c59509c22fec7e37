//! Knowledge-bot adapters.
//!
//! The reconciliation engine talks to two capabilities — [`Summarizer`] and
//! [`Publisher`] — and never to a concrete wire format. Two formats exist,
//! selected by bot configuration:
//!
//! - [`CommandBot`]: JSON command bot (app id + user email + app secret,
//!   `add:`/`update:`/`delete:` messages, document ids in replies)
//! - [`ExpertApi`]: bearer-token expert knowledge API (chat completions for
//!   summarization, markdown document upload for publishing)

pub mod prompt;

mod command;
mod expert;

pub use command::CommandBot;
pub use expert::ExpertApi;
pub use prompt::{Descendant, build_summary_prompt, clean_summary};

use triagesync_shared::{BotConfig, BotKind, Result, RetryPolicy, SyncError, Ticket, TicketKey};

/// User-Agent string for backend requests.
pub(crate) const USER_AGENT: &str = concat!("triagesync/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

/// A natural-language knowledge artifact produced from one ultimate parent
/// and its descendants, ready for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Display title (the parent ticket's title).
    pub title: String,
    /// Summary body text.
    pub body: String,
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Turns a ticket plus its descendant snapshot into a knowledge artifact.
pub trait Summarizer {
    fn summarize(
        &self,
        ticket: &Ticket,
        descendants: &[Descendant],
    ) -> impl Future<Output = Result<Artifact>>;
}

/// Ingests artifacts into (and retracts them from) the remote knowledge base.
pub trait Publisher {
    /// Upload an artifact. `existing` carries the backend reference of a
    /// previously-published version when this is a refresh. Returns the new
    /// backend reference, when the backend issues one.
    fn publish(
        &self,
        key: &TicketKey,
        artifact: &Artifact,
        existing: Option<&str>,
    ) -> impl Future<Output = Result<Option<String>>>;

    /// Remove a previously-published entry.
    fn retract(
        &self,
        key: &TicketKey,
        remote_ref: Option<&str>,
    ) -> impl Future<Output = Result<()>>;
}

// ---------------------------------------------------------------------------
// Config-driven dispatch
// ---------------------------------------------------------------------------

/// A configured bot of either wire format.
pub enum AnyBot {
    Command(CommandBot),
    Expert(ExpertApi),
}

/// Build a bot from its registry entry. `tracker_base_url` feeds citation
/// links on published entries.
pub fn build_bot(
    config: &BotConfig,
    tracker_base_url: &str,
    retry: RetryPolicy,
) -> Result<AnyBot> {
    config.validate()?;
    match config.kind {
        BotKind::Command => Ok(AnyBot::Command(CommandBot::new(config, retry)?)),
        BotKind::Expert => Ok(AnyBot::Expert(ExpertApi::new(
            config,
            tracker_base_url,
            retry,
        )?)),
    }
}

impl Summarizer for AnyBot {
    async fn summarize(&self, ticket: &Ticket, descendants: &[Descendant]) -> Result<Artifact> {
        match self {
            Self::Command(bot) => bot.summarize(ticket, descendants).await,
            Self::Expert(bot) => bot.summarize(ticket, descendants).await,
        }
    }
}

impl Publisher for AnyBot {
    async fn publish(
        &self,
        key: &TicketKey,
        artifact: &Artifact,
        existing: Option<&str>,
    ) -> Result<Option<String>> {
        match self {
            Self::Command(bot) => bot.publish(key, artifact, existing).await,
            Self::Expert(bot) => bot.publish(key, artifact, existing).await,
        }
    }

    async fn retract(&self, key: &TicketKey, remote_ref: Option<&str>) -> Result<()> {
        match self {
            Self::Command(bot) => bot.retract(key, remote_ref).await,
            Self::Expert(bot) => bot.retract(key, remote_ref).await,
        }
    }
}

/// Shared HTTP client construction for both adapters.
pub(crate) fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(std::time::Duration::from_secs(60))
        .build()
        .map_err(|e| SyncError::Backend(format!("failed to build HTTP client: {e}")))
}
