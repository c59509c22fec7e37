//! SQL migration definitions for the triagesync tracking database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: published_records, sync_runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- What is currently represented in the remote knowledge base, one row per
-- ultimate parent ticket
CREATE TABLE IF NOT EXISTS published_records (
    ticket_key       TEXT PRIMARY KEY,
    descendant_count INTEGER NOT NULL DEFAULT 0,
    fingerprint      TEXT NOT NULL,
    status           TEXT NOT NULL,
    remote_ref       TEXT,
    summary          TEXT,
    last_error       TEXT,
    published_at     TEXT,
    updated_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_published_records_status ON published_records(status);

-- Reconciliation run history
CREATE TABLE IF NOT EXISTS sync_runs (
    id          TEXT PRIMARY KEY,
    mode        TEXT NOT NULL,
    target_size INTEGER,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    report_json TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_started_at ON sync_runs(started_at);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
