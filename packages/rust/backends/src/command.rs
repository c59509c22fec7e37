//! JSON command-bot adapter.
//!
//! One endpoint, two request shapes: summarization goes out as a `question`
//! with a fresh request id, knowledge operations as `message_content`
//! commands (`add:` / `update:` / `delete: <doc_id>`).

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use triagesync_shared::{BotConfig, BotKind, Result, RetryPolicy, SyncError, Ticket, TicketKey};

use crate::prompt::{Descendant, build_summary_prompt, clean_summary};
use crate::{Artifact, Publisher, Summarizer, build_http_client};

/// Adapter for the JSON command-bot wire format.
pub struct CommandBot {
    http: Client,
    url: String,
    app_id: String,
    user_email: String,
    secret: String,
    retry: RetryPolicy,
}

impl CommandBot {
    pub fn new(config: &BotConfig, retry: RetryPolicy) -> Result<Self> {
        if config.kind != BotKind::Command {
            return Err(SyncError::config(format!(
                "bot '{}' is not a command bot",
                config.name
            )));
        }
        Ok(Self {
            http: build_http_client()?,
            url: config.url.clone(),
            app_id: config.app_id.clone().unwrap_or_default(),
            user_email: config.user_email.clone().unwrap_or_default(),
            secret: config.secret()?,
            retry,
        })
    }

    /// Ask the bot a free-form question; returns the reply text.
    async fn ask(&self, question: &str) -> Result<String> {
        #[derive(serde::Deserialize)]
        struct AskReply {
            #[serde(default)]
            reply: String,
        }

        let payload = json!({
            "app_id": self.app_id,
            "user_email": self.user_email,
            "app_secret": self.secret,
            "request_id": Uuid::now_v7().to_string(),
            "question": question,
        });

        let reply: AskReply = self.post(&payload, "summarization request").await?;
        let text = reply.reply.trim().to_string();
        if text.is_empty() {
            return Err(SyncError::Backend("empty reply from command bot".into()));
        }
        Ok(text)
    }

    /// Send a knowledge command (`add:` / `update:` / `delete:`).
    async fn command(&self, message: &str) -> Result<serde_json::Value> {
        let payload = json!({
            "app_id": self.app_id,
            "user_email": self.user_email,
            "app_secret": self.secret,
            "message_content": message,
        });
        self.post(&payload, "knowledge command").await
    }

    /// POST with bounded retry on transport errors and 5xx/429 responses.
    async fn post<T: DeserializeOwned>(&self, payload: &serde_json::Value, what: &str) -> Result<T> {
        let mut last_error = String::new();

        for attempt in 1..=self.retry.attempts {
            match self.http.post(&self.url).json(payload).send().await {
                Ok(resp) if resp.status().is_success() => {
                    return resp.json::<T>().await.map_err(|e| {
                        SyncError::Backend(format!("malformed command-bot response: {e}"))
                    });
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    last_error = format!("{what} failed with HTTP {status}: {body}");
                    if !(status.is_server_error()
                        || status == reqwest::StatusCode::TOO_MANY_REQUESTS)
                    {
                        return Err(SyncError::Backend(last_error));
                    }
                }
                Err(e) => {
                    last_error = format!("{what} failed: {e}");
                }
            }

            if attempt < self.retry.attempts {
                let delay = self.retry.delay_for(attempt);
                warn!(attempt, max = self.retry.attempts, error = %last_error, ?delay, "retrying command-bot call");
                tokio::time::sleep(delay).await;
            }
        }

        Err(SyncError::Backend(last_error))
    }
}

impl Summarizer for CommandBot {
    async fn summarize(&self, ticket: &Ticket, descendants: &[Descendant]) -> Result<Artifact> {
        let prompt = build_summary_prompt(ticket, descendants);
        debug!(key = %ticket.key, prompt_len = prompt.len(), "requesting summary");
        let body = self.ask(&prompt).await?;
        Ok(Artifact {
            title: ticket.title.clone(),
            body,
        })
    }
}

impl Publisher for CommandBot {
    async fn publish(
        &self,
        key: &TicketKey,
        artifact: &Artifact,
        existing: Option<&str>,
    ) -> Result<Option<String>> {
        let verb = if existing.is_some() { "update" } else { "add" };
        let response = self
            .command(&format!("{verb}: {}", clean_summary(&artifact.body)))
            .await?;

        let doc_id = response
            .get("doc_id")
            .or_else(|| response.get("document_id"))
            .and_then(|v| v.as_str())
            .map(String::from)
            .or_else(|| existing.map(String::from));

        info!(%key, ?doc_id, verb, "published to command bot");
        Ok(doc_id)
    }

    async fn retract(&self, key: &TicketKey, remote_ref: Option<&str>) -> Result<()> {
        let doc_id = remote_ref.ok_or_else(|| {
            SyncError::Backend(format!("no document id recorded for {key}, cannot retract"))
        })?;
        self.command(&format!("delete: {doc_id}")).await?;
        info!(%key, doc_id, "retracted from command bot");
        Ok(())
    }
}
