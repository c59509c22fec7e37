//! Shared types, error model, and configuration for triagesync.
//!
//! This crate is the foundation depended on by all other triagesync crates.
//! It provides:
//! - [`SyncError`] — the unified error type
//! - Domain types ([`Ticket`], [`DuplicateLink`], [`PublishedRecord`], [`TicketKey`])
//! - Configuration ([`AppConfig`], [`RetryPolicy`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BotConfig, BotKind, DefaultsConfig, RetryConfig, RetryPolicy, TrackerConfig,
    config_dir, config_file_path, db_path, find_bot, init_config, load_config, load_config_from,
    validate_tracker,
};
pub use error::{Result, SyncError};
pub use types::{
    CURRENT_SCHEMA_VERSION, DuplicateLink, DuplicateLinks, PublishStatus, PublishedRecord,
    SyncRunSummary, Ticket, TicketKey,
};
