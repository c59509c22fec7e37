//! Application configuration for triagesync.
//!
//! User config lives at `~/.triagesync/triagesync.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets never live in the file — only the *names* of environment
//! variables holding them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "triagesync.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".triagesync";

/// Default tracking database file name.
const DB_FILE_NAME: &str = "triagesync.db";

// ---------------------------------------------------------------------------
// Config structs (matching triagesync.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Issue-tracker connection settings.
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Retry behavior for backend and tracker calls.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Registered knowledge bots (summarizers and publishers).
    #[serde(default)]
    pub bots: Vec<BotConfig>,
}

/// `[tracker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Base URL of the issue tracker (e.g. `https://tracker.example.com`).
    #[serde(default)]
    pub base_url: String,

    /// Account used for API authentication.
    #[serde(default)]
    pub username: String,

    /// Name of the env var holding the API token (never the token itself).
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Search query selecting the candidate parent tickets.
    #[serde(default)]
    pub parent_query: String,

    /// Page size for paginated search requests.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Whether to verify TLS certificates.
    #[serde(default = "default_true")]
    pub verify_tls: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            token_env: default_token_env(),
            parent_query: String::new(),
            page_size: default_page_size(),
            verify_tls: true,
        }
    }
}

fn default_token_env() -> String {
    "TRIAGESYNC_TRACKER_TOKEN".into()
}
fn default_page_size() -> usize {
    100
}
fn default_true() -> bool {
    true
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default published-set size for init runs.
    #[serde(default = "default_target_size")]
    pub target_size: usize,

    /// Path to the tracking database (defaults to `~/.triagesync/triagesync.db`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,

    /// Bot used for summarization unless overridden on the command line.
    #[serde(default = "default_bot_name")]
    pub summarizer: String,

    /// Bot used for publishing unless overridden on the command line.
    #[serde(default = "default_bot_name")]
    pub publisher: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            target_size: default_target_size(),
            db_path: None,
            summarizer: default_bot_name(),
            publisher: default_bot_name(),
        }
    }
}

fn default_target_size() -> usize {
    50
}
fn default_bot_name() -> String {
    "default".into()
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per backend/tracker call.
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Base delay before the first retry; doubles per attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}

/// Wire format a bot speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotKind {
    /// JSON command bot: app id + user email + app secret, `add:`/`delete:`
    /// style messages.
    Command,
    /// Expert knowledge API: bearer token, chat completions + document
    /// upload endpoints.
    Expert,
}

impl BotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Expert => "expert",
        }
    }
}

/// `[[bots]]` entry — one named bot in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Registry name, referenced by `--summarizer`/`--publisher`.
    pub name: String,
    /// Wire format.
    pub kind: BotKind,
    /// Endpoint base URL.
    pub url: String,

    // Command-bot fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    /// Env var holding the app secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_env: Option<String>,

    // Expert-API fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expert_id: Option<String>,
    /// Env var holding the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl BotConfig {
    /// Check that every field the bot's wire format needs is present and
    /// that the referenced secret env var is set and non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(SyncError::config(format!("bot '{}': url is required", self.name)));
        }
        match self.kind {
            BotKind::Command => {
                for (field, value) in [("app_id", &self.app_id), ("user_email", &self.user_email)] {
                    if value.as_deref().unwrap_or("").is_empty() {
                        return Err(SyncError::config(format!(
                            "bot '{}': {field} is required for command bots",
                            self.name
                        )));
                    }
                }
                let var = self.secret_env.as_deref().unwrap_or("");
                if var.is_empty() {
                    return Err(SyncError::config(format!(
                        "bot '{}': secret_env is required for command bots",
                        self.name
                    )));
                }
                require_env(&self.name, var)
            }
            BotKind::Expert => {
                if self.expert_id.as_deref().unwrap_or("").is_empty() {
                    return Err(SyncError::config(format!(
                        "bot '{}': expert_id is required for expert bots",
                        self.name
                    )));
                }
                let var = self.api_key_env.as_deref().unwrap_or("");
                if var.is_empty() {
                    return Err(SyncError::config(format!(
                        "bot '{}': api_key_env is required for expert bots",
                        self.name
                    )));
                }
                require_env(&self.name, var)
            }
        }
    }

    /// Read the bot's secret from its configured env var.
    pub fn secret(&self) -> Result<String> {
        let var = match self.kind {
            BotKind::Command => self.secret_env.as_deref(),
            BotKind::Expert => self.api_key_env.as_deref(),
        }
        .unwrap_or("");
        std::env::var(var).map_err(|_| {
            SyncError::config(format!("bot '{}': env var {var} is not set", self.name))
        })
    }
}

fn require_env(bot: &str, var: &str) -> Result<()> {
    match std::env::var(var) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(SyncError::config(format!(
            "bot '{bot}': secret not found. Set the {var} environment variable."
        ))),
    }
}

// ---------------------------------------------------------------------------
// Runtime retry policy
// ---------------------------------------------------------------------------

/// Runtime retry policy — merged from config, shared by tracker and backends.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts per call (≥ 1).
    pub attempts: u32,
    /// Base delay; attempt `n` waits `base * 2^(n-1)`.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retrying after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Policy with no waiting, for tests.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            base_delay: Duration::ZERO,
        }
    }
}

impl From<&AppConfig> for RetryPolicy {
    fn from(config: &AppConfig) -> Self {
        Self {
            attempts: config.retry.attempts.max(1),
            base_delay: Duration::from_millis(config.retry.base_delay_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.triagesync/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SyncError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.triagesync/triagesync.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolve the tracking database path from config, defaulting to
/// `~/.triagesync/triagesync.db`.
pub fn db_path(config: &AppConfig) -> Result<PathBuf> {
    match config.defaults.db_path.as_deref() {
        Some(p) if !p.is_empty() => Ok(PathBuf::from(p)),
        _ => Ok(config_dir()?.join(DB_FILE_NAME)),
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| SyncError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SyncError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SyncError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SyncError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the tracker section is usable for a run.
pub fn validate_tracker(config: &AppConfig) -> Result<()> {
    let tracker = &config.tracker;
    if tracker.base_url.is_empty() {
        return Err(SyncError::config("tracker.base_url is not configured"));
    }
    if tracker.parent_query.is_empty() {
        return Err(SyncError::config("tracker.parent_query is not configured"));
    }
    match std::env::var(&tracker.token_env) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(SyncError::config(format!(
            "tracker API token not found. Set the {} environment variable.",
            tracker.token_env
        ))),
    }
}

/// Look up a bot by registry name.
pub fn find_bot<'a>(config: &'a AppConfig, name: &str) -> Result<&'a BotConfig> {
    config.bots.iter().find(|b| b.name == name).ok_or_else(|| {
        let known: Vec<&str> = config.bots.iter().map(|b| b.name.as_str()).collect();
        SyncError::config(format!(
            "no bot named '{name}' configured (known: {})",
            if known.is_empty() {
                "none".to_string()
            } else {
                known.join(", ")
            }
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("parent_query"));
        assert!(toml_str.contains("TRIAGESYNC_TRACKER_TOKEN"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.target_size, 50);
        assert_eq!(parsed.tracker.page_size, 100);
        assert_eq!(parsed.retry.attempts, 3);
    }

    #[test]
    fn config_with_bots() {
        let toml_str = r#"
[tracker]
base_url = "https://tracker.example.com"
parent_query = "project = FEED AND labels = feedback-parent"

[[bots]]
name = "kb-main"
kind = "command"
url = "https://bots.example.com/api/send"
app_id = "app-123"
user_email = "sync@example.com"
secret_env = "KB_MAIN_SECRET"

[[bots]]
name = "expert-kb"
kind = "expert"
url = "https://expert.example.com/api"
expert_id = "42"
api_key_env = "EXPERT_KB_KEY"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.bots.len(), 2);
        assert_eq!(config.bots[0].kind, BotKind::Command);
        assert_eq!(config.bots[1].kind, BotKind::Expert);
        assert!(find_bot(&config, "expert-kb").is_ok());
        assert!(find_bot(&config, "missing").is_err());
    }

    #[test]
    fn bot_validation_requires_fields() {
        let bot = BotConfig {
            name: "incomplete".into(),
            kind: BotKind::Command,
            url: "https://bots.example.com".into(),
            app_id: None,
            user_email: Some("sync@example.com".into()),
            secret_env: Some("X".into()),
            expert_id: None,
            api_key_env: None,
        };
        let err = bot.validate().unwrap_err();
        assert!(err.to_string().contains("app_id"));
    }

    #[test]
    fn bot_validation_requires_secret_env() {
        let bot = BotConfig {
            name: "nosecret".into(),
            kind: BotKind::Expert,
            url: "https://expert.example.com".into(),
            app_id: None,
            user_email: None,
            secret_env: None,
            expert_id: Some("7".into()),
            // Unique var name to avoid interfering with other tests.
            api_key_env: Some("TS_TEST_NONEXISTENT_KEY_98765".into()),
        };
        let result = bot.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("environment variable"));
    }

    #[test]
    fn retry_policy_backoff_doubles() {
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn tracker_validation() {
        let config = AppConfig::default();
        // Empty base_url fails before any env lookup.
        assert!(validate_tracker(&config).is_err());
    }
}
