//! Expert knowledge API adapter.
//!
//! Bearer-token REST API with distinct endpoints per capability:
//! chat completions for summarization, markdown document upload for
//! publishing, entry deletion for retraction (404 counts as retracted).

use chrono::Utc;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use triagesync_shared::{BotConfig, BotKind, Result, RetryPolicy, SyncError, Ticket, TicketKey};

use crate::prompt::{Descendant, build_summary_prompt};
use crate::{Artifact, Publisher, Summarizer, build_http_client};

/// Minimum plausible summary length; anything shorter is treated as a
/// refusal rather than an answer.
const MIN_SUMMARY_LEN: usize = 50;

/// Reply fragments that mean the bot failed to answer, regardless of the
/// 200 status around them.
const ERROR_PATTERNS: &[&str] = &[
    "i'm sorry",
    "i am sorry",
    "couldn't find",
    "could not find",
    "couldn't answer",
    "could not answer",
    "insufficient information",
    "not enough information",
    "please try again",
    "please rephrase",
    "unable to process",
    "unable to answer",
    "no information available",
    "i don't understand",
    "i cannot help",
    "please clarify",
    "more context needed",
];

/// Adapter for the expert knowledge API wire format.
pub struct ExpertApi {
    http: Client,
    base_url: String,
    expert_id: String,
    api_key: String,
    user_email: String,
    /// Tracker base URL; citation links on uploaded documents point here.
    browse_base: String,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct UploadReply {
    #[serde(default)]
    id: Option<i64>,
}

impl ExpertApi {
    pub fn new(config: &BotConfig, tracker_base_url: &str, retry: RetryPolicy) -> Result<Self> {
        if config.kind != BotKind::Expert {
            return Err(SyncError::config(format!(
                "bot '{}' is not an expert-API bot",
                config.name
            )));
        }
        Ok(Self {
            http: build_http_client()?,
            base_url: config.url.trim_end_matches('/').to_string(),
            expert_id: config.expert_id.clone().unwrap_or_default(),
            api_key: config.secret()?,
            user_email: config
                .user_email
                .clone()
                .unwrap_or_else(|| "system@example.com".to_string()),
            browse_base: tracker_base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    fn knowledges_url(&self) -> String {
        format!("{}/experts/{}/knowledges", self.base_url, self.expert_id)
    }

    /// Extract and validate the summary from a chat response. The main
    /// content is choice 0; choice 1, when present, carries citation
    /// metadata as embedded JSON.
    fn extract_summary(&self, response: ChatResponse) -> Result<String> {
        let Some(first) = response.choices.first() else {
            return Err(SyncError::Backend("no choices in expert response".into()));
        };
        let mut content = first.message.content.trim().to_string();

        if content.is_empty() {
            return Err(SyncError::Backend("empty content in expert response".into()));
        }
        if is_error_reply(&content) {
            let preview: String = content.chars().take(100).collect();
            return Err(SyncError::Backend(format!(
                "expert returned an error message instead of a summary: {preview}"
            )));
        }
        if content.len() < MIN_SUMMARY_LEN {
            return Err(SyncError::Backend(format!(
                "expert returned insufficient content ({} chars)",
                content.len()
            )));
        }

        if let Some(meta_choice) = response.choices.get(1) {
            if let Ok(meta) =
                serde_json::from_str::<serde_json::Value>(&meta_choice.message.content)
            {
                if let Some(citations) = meta.get("citations").and_then(|c| c.as_array()) {
                    if !citations.is_empty() {
                        content.push_str("\n\nSources:");
                        for (i, citation) in citations.iter().enumerate() {
                            let title = citation
                                .get("title")
                                .and_then(|t| t.as_str())
                                .unwrap_or("Unknown source");
                            content.push_str(&format!("\n[{}] {title}", i + 1));
                        }
                    }
                }
            } else {
                debug!("no valid citation metadata in expert response");
            }
        }

        Ok(content)
    }

    /// Upload one markdown document; retried because the form must be
    /// rebuilt per attempt.
    async fn upload(
        &self,
        key: &TicketKey,
        markdown: &str,
        citation_url: &str,
        citation_title: &str,
    ) -> Result<Option<String>> {
        let mut last_error = String::new();

        for attempt in 1..=self.retry.attempts {
            let file = Part::bytes(markdown.as_bytes().to_vec())
                .file_name(format!("{key}.md"))
                .mime_str("text/markdown")
                .map_err(|e| SyncError::Backend(format!("invalid upload part: {e}")))?;
            let form = Form::new()
                .part("file", file)
                .text("citation_url", citation_url.to_string())
                .text("citation_title", citation_title.to_string());

            let response = self
                .http
                .post(self.knowledges_url())
                .bearer_auth(&self.api_key)
                .multipart(form)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let reply: UploadReply = resp.json().await.map_err(|e| {
                        SyncError::Backend(format!("malformed upload response: {e}"))
                    })?;
                    return match reply.id {
                        Some(id) => Ok(Some(id.to_string())),
                        None => Err(SyncError::Backend(
                            "upload accepted but no entry id returned".into(),
                        )),
                    };
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    last_error = format!("upload failed with HTTP {status}: {body}");
                    if !is_transient(status) {
                        return Err(SyncError::Backend(last_error));
                    }
                }
                Err(e) => {
                    last_error = format!("upload failed: {e}");
                }
            }

            if attempt < self.retry.attempts {
                let delay = self.retry.delay_for(attempt);
                warn!(attempt, max = self.retry.attempts, error = %last_error, ?delay, "retrying expert upload");
                tokio::time::sleep(delay).await;
            }
        }

        Err(SyncError::Backend(last_error))
    }
}

/// Wrap a summary in the markdown document shape the expert API ingests.
fn to_markdown(artifact: &Artifact, citation_url: &str, citation_title: &str) -> String {
    format!(
        "# {citation_title}\n\n\
         ## Content\n\n\
         {}\n\n\
         ## Source\n\n\
         - **Citation**: [{citation_title}]({citation_url})\n\
         - **Added**: {}\n\n\
         ---\n\
         *Generated automatically from a ticket hierarchy summary.*\n",
        artifact.body.trim(),
        Utc::now().format("%Y-%m-%d %H:%M:%S"),
    )
}

fn is_error_reply(content: &str) -> bool {
    let lowered = content.to_lowercase();
    ERROR_PATTERNS.iter().any(|p| lowered.contains(p))
}

fn is_transient(status: reqwest::StatusCode) -> bool {
    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

impl Summarizer for ExpertApi {
    async fn summarize(&self, ticket: &Ticket, descendants: &[Descendant]) -> Result<Artifact> {
        let url = format!(
            "{}/experts/{}/v2/chat/completions",
            self.base_url, self.expert_id
        );
        let payload = json!({
            "messages": [{"role": "user", "content": build_summary_prompt(ticket, descendants)}],
            "user": self.user_email,
            "stream": false,
        });

        let mut last_error = String::new();
        for attempt in 1..=self.retry.attempts {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&payload)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let chat: ChatResponse = resp.json().await.map_err(|e| {
                        SyncError::Backend(format!("malformed chat response: {e}"))
                    })?;
                    let body = self.extract_summary(chat)?;
                    return Ok(Artifact {
                        title: ticket.title.clone(),
                        body,
                    });
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    last_error = format!("chat request failed with HTTP {status}: {body}");
                    if !is_transient(status) {
                        return Err(SyncError::Backend(last_error));
                    }
                }
                Err(e) => {
                    last_error = format!("chat request failed: {e}");
                }
            }

            if attempt < self.retry.attempts {
                let delay = self.retry.delay_for(attempt);
                warn!(attempt, max = self.retry.attempts, error = %last_error, ?delay, "retrying expert chat call");
                tokio::time::sleep(delay).await;
            }
        }

        Err(SyncError::Backend(last_error))
    }
}

impl Publisher for ExpertApi {
    async fn publish(
        &self,
        key: &TicketKey,
        artifact: &Artifact,
        existing: Option<&str>,
    ) -> Result<Option<String>> {
        // The API has no in-place update; refresh is retract-then-add.
        if let Some(old) = existing {
            if let Err(e) = self.retract(key, Some(old)).await {
                warn!(%key, old, error = %e, "stale entry not retracted before re-add");
            }
        }

        let citation_url = format!("{}/browse/{key}", self.browse_base);
        let citation_title = format!("Ticket {key}");
        let markdown = to_markdown(artifact, &citation_url, &citation_title);

        let entry_id = self
            .upload(key, &markdown, &citation_url, &citation_title)
            .await?;
        info!(%key, ?entry_id, "published to expert API");
        Ok(entry_id)
    }

    async fn retract(&self, key: &TicketKey, remote_ref: Option<&str>) -> Result<()> {
        let entry_id = remote_ref.ok_or_else(|| {
            SyncError::Backend(format!("no entry id recorded for {key}, cannot retract"))
        })?;
        let url = format!("{}/{entry_id}", self.knowledges_url());

        let mut last_error = String::new();
        for attempt in 1..=self.retry.attempts {
            match self.http.delete(&url).bearer_auth(&self.api_key).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(%key, entry_id, "retracted from expert API");
                    return Ok(());
                }
                Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => {
                    // Already gone; the goal state is reached.
                    warn!(%key, entry_id, "entry not found, treating retraction as done");
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    last_error = format!("delete failed with HTTP {status}");
                    if !is_transient(status) {
                        return Err(SyncError::Backend(last_error));
                    }
                }
                Err(e) => {
                    last_error = format!("delete failed: {e}");
                }
            }

            if attempt < self.retry.attempts {
                let delay = self.retry.delay_for(attempt);
                warn!(attempt, max = self.retry.attempts, error = %last_error, ?delay, "retrying expert delete");
                tokio::time::sleep(delay).await;
            }
        }

        Err(SyncError::Backend(last_error))
    }
}
