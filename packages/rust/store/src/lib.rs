//! libSQL tracking store.
//!
//! The [`Store`] struct wraps a libSQL database holding the published-record
//! ledger (the single source of truth for "what is currently published") and
//! the reconciliation run history.
//!
//! **Access rules:**
//! - The reconciliation engine is the sole writer via [`Store::open`]
//! - Status queries may use [`Store::open_readonly`]
//!
//! Every write is committed immediately; an interrupted run loses at most
//! the in-flight entry, never prior progress.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use uuid::Uuid;

use triagesync_shared::{
    CURRENT_SCHEMA_VERSION, PublishStatus, PublishedRecord, Result, SyncError, SyncRunSummary,
    TicketKey,
};

/// Primary store handle wrapping a libSQL database.
pub struct Store {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Store {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| SyncError::Store(e.to_string()))?;

        let conn = db.connect().map_err(|e| SyncError::Store(e.to_string()))?;

        let store = Self {
            db,
            conn,
            readonly: false,
        };
        store.run_migrations().await?;

        let version = store.get_schema_version().await;
        if version != CURRENT_SCHEMA_VERSION {
            return Err(SyncError::Store(format!(
                "schema version {version} after migration, expected {CURRENT_SCHEMA_VERSION}"
            )));
        }
        Ok(store)
    }

    /// Open a database at `path` in read-only mode (status queries).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| SyncError::Store(e.to_string()))?;

        let conn = db.connect().map_err(|e| SyncError::Store(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        SyncError::Store(format!("migration v{} failed: {e}", migration.version))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(SyncError::Store(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Published records
    // -----------------------------------------------------------------------

    /// Insert or update one published record, committed immediately.
    pub async fn upsert(&self, record: &PublishedRecord) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO published_records
                   (ticket_key, descendant_count, fingerprint, status, remote_ref,
                    summary, last_error, published_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(ticket_key) DO UPDATE SET
                   descendant_count = excluded.descendant_count,
                   fingerprint = excluded.fingerprint,
                   status = excluded.status,
                   remote_ref = excluded.remote_ref,
                   summary = excluded.summary,
                   last_error = excluded.last_error,
                   published_at = excluded.published_at,
                   updated_at = excluded.updated_at",
                params![
                    record.ticket_key.as_str(),
                    record.descendant_count as i64,
                    record.fingerprint.as_str(),
                    record.status.as_str(),
                    record.remote_ref.as_deref(),
                    record.summary.as_deref(),
                    record.last_error.as_deref(),
                    record.published_at.map(|t| t.to_rfc3339()),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| SyncError::Store(e.to_string()))?;
        Ok(())
    }

    /// Get one record by ticket key.
    pub async fn get_record(&self, key: &TicketKey) -> Result<Option<PublishedRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT ticket_key, descendant_count, fingerprint, status, remote_ref,
                        summary, last_error, published_at, updated_at
                 FROM published_records WHERE ticket_key = ?1",
                params![key.as_str()],
            )
            .await
            .map_err(|e| SyncError::Store(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(SyncError::Store(e.to_string())),
        }
    }

    /// List every record, in ticket-key order.
    pub async fn list_records(&self) -> Result<Vec<PublishedRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT ticket_key, descendant_count, fingerprint, status, remote_ref,
                        summary, last_error, published_at, updated_at
                 FROM published_records ORDER BY ticket_key",
                params![],
            )
            .await
            .map_err(|e| SyncError::Store(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_record(&row)?);
        }
        Ok(results)
    }

    /// Delete a record by ticket key.
    pub async fn remove(&self, key: &TicketKey) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM published_records WHERE ticket_key = ?1",
                params![key.as_str()],
            )
            .await
            .map_err(|e| SyncError::Store(e.to_string()))?;
        Ok(())
    }

    /// Count records currently live in the remote knowledge base.
    pub async fn published_count(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM published_records WHERE status = ?1",
                params![PublishStatus::Published.as_str()],
            )
            .await
            .map_err(|e| SyncError::Store(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row.get(0).map_err(|e| SyncError::Store(e.to_string()))?;
                Ok(count as usize)
            }
            _ => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    /// Record the start of a reconciliation run. Returns the run id.
    pub async fn begin_run(&self, mode: &str, target_size: Option<usize>) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO sync_runs (id, mode, target_size, started_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    id.as_str(),
                    mode,
                    target_size.map(|n| n as i64),
                    now.as_str()
                ],
            )
            .await
            .map_err(|e| SyncError::Store(e.to_string()))?;
        Ok(id)
    }

    /// Mark a run finished with its serialized execution report.
    pub async fn finish_run(&self, run_id: &str, report_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE sync_runs SET finished_at = ?1, report_json = ?2 WHERE id = ?3",
                params![now.as_str(), report_json, run_id],
            )
            .await
            .map_err(|e| SyncError::Store(e.to_string()))?;
        Ok(())
    }

    /// Most recently started run, if any.
    pub async fn last_run(&self) -> Result<Option<SyncRunSummary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, mode, target_size, started_at, finished_at, report_json
                 FROM sync_runs ORDER BY started_at DESC, id DESC LIMIT 1",
                params![],
            )
            .await
            .map_err(|e| SyncError::Store(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let target_size: Option<i64> = row.get(2).ok();
                let report: Option<String> = row.get(5).ok();
                Ok(Some(SyncRunSummary {
                    id: row.get::<String>(0).map_err(|e| SyncError::Store(e.to_string()))?,
                    mode: row.get::<String>(1).map_err(|e| SyncError::Store(e.to_string()))?,
                    target_size: target_size.map(|n| n as usize),
                    started_at: parse_timestamp(
                        &row.get::<String>(3).map_err(|e| SyncError::Store(e.to_string()))?,
                    )?,
                    finished_at: row
                        .get::<String>(4)
                        .ok()
                        .map(|s| parse_timestamp(&s))
                        .transpose()?,
                    report: report.and_then(|r| serde_json::from_str(&r).ok()),
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(SyncError::Store(e.to_string())),
        }
    }
}

/// Convert a database row to a [`PublishedRecord`].
fn row_to_record(row: &libsql::Row) -> Result<PublishedRecord> {
    let status_raw: String = row.get(3).map_err(|e| SyncError::Store(e.to_string()))?;
    let status: PublishStatus = status_raw
        .parse()
        .map_err(|e: String| SyncError::Store(e))?;

    Ok(PublishedRecord {
        ticket_key: TicketKey::from(
            row.get::<String>(0)
                .map_err(|e| SyncError::Store(e.to_string()))?,
        ),
        descendant_count: row
            .get::<i64>(1)
            .map_err(|e| SyncError::Store(e.to_string()))? as usize,
        fingerprint: row
            .get::<String>(2)
            .map_err(|e| SyncError::Store(e.to_string()))?,
        status,
        remote_ref: row.get::<String>(4).ok(),
        summary: row.get::<String>(5).ok(),
        last_error: row.get::<String>(6).ok(),
        published_at: row
            .get::<String>(7)
            .ok()
            .map(|s| parse_timestamp(&s))
            .transpose()?,
        updated_at: parse_timestamp(
            &row.get::<String>(8)
                .map_err(|e| SyncError::Store(e.to_string()))?,
        )?,
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::Store(format!("invalid date: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    /// Create a temp file store for testing.
    async fn test_store() -> Store {
        let tmp = std::env::temp_dir().join(format!("ts_test_{}.db", Uuid::now_v7()));
        Store::open(&tmp).await.expect("open test db")
    }

    fn record(key: &str, status: PublishStatus) -> PublishedRecord {
        PublishedRecord {
            ticket_key: TicketKey::from(key),
            descendant_count: 3,
            fingerprint: "fp-1".into(),
            status,
            remote_ref: Some("doc-1".into()),
            summary: Some("summary text".into()),
            last_error: None,
            published_at: Some(Utc::now()),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let store = test_store().await;
        let version = store.get_schema_version().await;
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("ts_test_{}.db", Uuid::now_v7()));
        let s1 = Store::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Store::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn record_crud() {
        let store = test_store().await;

        store
            .upsert(&record("FEED-1", PublishStatus::Published))
            .await
            .expect("upsert");

        let found = store
            .get_record(&TicketKey::from("FEED-1"))
            .await
            .expect("get")
            .expect("record exists");
        assert_eq!(found.descendant_count, 3);
        assert_eq!(found.status, PublishStatus::Published);
        assert_eq!(found.remote_ref.as_deref(), Some("doc-1"));

        // Upsert transitions status in place.
        let mut failed = record("FEED-1", PublishStatus::Failed);
        failed.last_error = Some("quota exceeded".into());
        store.upsert(&failed).await.expect("upsert again");
        let found = store
            .get_record(&TicketKey::from("FEED-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.status, PublishStatus::Failed);
        assert_eq!(found.last_error.as_deref(), Some("quota exceeded"));

        store
            .remove(&TicketKey::from("FEED-1"))
            .await
            .expect("remove");
        assert!(
            store
                .get_record(&TicketKey::from("FEED-1"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn list_is_key_ordered() {
        let store = test_store().await;
        for key in ["FEED-3", "FEED-1", "FEED-2"] {
            store
                .upsert(&record(key, PublishStatus::Published))
                .await
                .unwrap();
        }

        let records = store.list_records().await.expect("list");
        let keys: Vec<&str> = records.iter().map(|r| r.ticket_key.as_str()).collect();
        assert_eq!(keys, vec!["FEED-1", "FEED-2", "FEED-3"]);
    }

    #[tokio::test]
    async fn published_count_ignores_inactive() {
        let store = test_store().await;
        store.upsert(&record("FEED-1", PublishStatus::Published)).await.unwrap();
        store.upsert(&record("FEED-2", PublishStatus::Published)).await.unwrap();
        store.upsert(&record("FEED-3", PublishStatus::Failed)).await.unwrap();
        store.upsert(&record("FEED-4", PublishStatus::Retired)).await.unwrap();

        assert_eq!(store.published_count().await.expect("count"), 2);
    }

    #[tokio::test]
    async fn run_lifecycle() {
        let store = test_store().await;

        let run_id = store.begin_run("update", Some(25)).await.expect("begin");
        assert!(!run_id.is_empty());

        store
            .finish_run(&run_id, r#"{"added": 2, "failed": 0}"#)
            .await
            .expect("finish");

        let last = store.last_run().await.expect("last").expect("run exists");
        assert_eq!(last.id, run_id);
        assert_eq!(last.mode, "update");
        assert_eq!(last.target_size, Some(25));
        assert!(last.finished_at.is_some());
        assert_eq!(
            last.report.as_ref().and_then(|r| r.get("added")).and_then(|v| v.as_i64()),
            Some(2)
        );
    }

    #[tokio::test]
    async fn last_run_is_most_recent() {
        let store = test_store().await;
        let _first = store.begin_run("init", Some(10)).await.unwrap();
        let second = store.begin_run("update", None).await.unwrap();

        // UUIDv7 ids break started_at ties in insertion order.
        let last = store.last_run().await.unwrap().unwrap();
        assert_eq!(last.id, second);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("ts_test_{}.db", Uuid::now_v7()));
        let rw = Store::open(&tmp).await.unwrap();
        rw.upsert(&record("FEED-1", PublishStatus::Published))
            .await
            .unwrap();
        drop(rw);

        let ro = Store::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.list_records().await.unwrap().len(), 1);
        let result = ro.upsert(&record("FEED-2", PublishStatus::Published)).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
