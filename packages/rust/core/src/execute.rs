//! Plan execution: drive the summarize → publish pipeline per entry and
//! commit state transitions as they happen.
//!
//! Entries are processed sequentially, retirements strictly before
//! additions, and every record write is committed immediately after its
//! backend call — an interrupted run loses at most the in-flight entry.
//! One entry's backend failure never aborts the batch; it becomes a
//! `failed` record and a line in the report.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use triagesync_backends::{Artifact, Descendant, Publisher, Summarizer};
use triagesync_hierarchy::UltimateParent;
use triagesync_shared::{
    DuplicateLink, PublishStatus, PublishedRecord, Result, Ticket, TicketKey,
};
use triagesync_store::Store;

use crate::reconcile::ReconcilePlan;
use crate::sync::ProgressReporter;

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Per-entry action kinds, for failure attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Add,
    Refresh,
    Retire,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Refresh => "refresh",
            Self::Retire => "retire",
        }
    }
}

/// One failed plan entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEntry {
    pub ticket_key: TicketKey,
    pub action: ActionKind,
    pub reason: String,
}

/// Outcome of executing one plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub added: usize,
    pub refreshed: usize,
    pub retired: usize,
    /// Stale local rows dropped without backend calls.
    pub purged: usize,
    pub unchanged: usize,
    pub failures: Vec<FailureEntry>,
    pub elapsed_ms: u64,
}

impl ExecutionReport {
    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    pub fn processed_count(&self) -> usize {
        self.added + self.refreshed + self.retired
    }
}

// ---------------------------------------------------------------------------
// Descendant snapshots
// ---------------------------------------------------------------------------

/// Ticket snapshots and child lookups backing the summarization prompts,
/// built once per run from the fetched graph.
pub struct DescendantSource {
    children: HashMap<TicketKey, BTreeSet<TicketKey>>,
    tickets: HashMap<TicketKey, Ticket>,
}

impl DescendantSource {
    pub fn new(tickets: &[Ticket], links: &[DuplicateLink]) -> Self {
        let mut children: HashMap<TicketKey, BTreeSet<TicketKey>> = HashMap::new();
        for link in links {
            if link.source != link.target {
                children
                    .entry(link.target.clone())
                    .or_default()
                    .insert(link.source.clone());
            }
        }
        Self {
            children,
            tickets: tickets.iter().map(|t| (t.key.clone(), t.clone())).collect(),
        }
    }

    /// Breadth-first snapshot of a candidate's descendants with generation
    /// depths, restricted to its resolved descendant set (which already
    /// excludes any cyclic region).
    pub fn snapshot(&self, parent: &UltimateParent) -> Vec<Descendant> {
        let mut out = Vec::with_capacity(parent.descendants.len());
        let mut seen: BTreeSet<&TicketKey> = BTreeSet::new();
        let mut level: Vec<&TicketKey> = self
            .children
            .get(parent.key())
            .into_iter()
            .flatten()
            .filter(|k| parent.descendants.contains(*k))
            .collect();
        let mut generation = 1u32;

        while !level.is_empty() {
            let mut next = Vec::new();
            for key in level {
                if !seen.insert(key) {
                    continue;
                }
                let ticket = self
                    .tickets
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| Ticket::new(key.as_str(), ""));
                out.push(Descendant { ticket, generation });
                next.extend(
                    self.children
                        .get(key)
                        .into_iter()
                        .flatten()
                        .filter(|k| parent.descendants.contains(*k)),
                );
            }
            level = next;
            generation += 1;
        }

        out
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Execute a plan against the backends and commit every transition to the
/// store. Store failures are fatal; backend failures are per-entry.
pub async fn execute<S: Summarizer, P: Publisher>(
    plan: &ReconcilePlan,
    source: &DescendantSource,
    summarizer: &S,
    publisher: &P,
    store: &Store,
    progress: &dyn ProgressReporter,
) -> Result<ExecutionReport> {
    let start = Instant::now();
    let total = plan.entry_count();
    let mut current = 0usize;
    let mut report = ExecutionReport {
        unchanged: plan.unchanged.len(),
        ..Default::default()
    };

    // Retirements first: a shrinking target must never transiently hold
    // more entries remotely than it is allowed to.
    for record in &plan.to_retire {
        current += 1;
        progress.entry_processed("retire", record.ticket_key.as_str(), current, total);

        match publisher
            .retract(&record.ticket_key, record.remote_ref.as_deref())
            .await
        {
            Ok(()) => {
                store.remove(&record.ticket_key).await?;
                report.retired += 1;
                info!(key = %record.ticket_key, "retired");
            }
            Err(e) => {
                warn!(key = %record.ticket_key, error = %e, "retraction failed");
                mark_failed(store, record, &e.to_string()).await?;
                report.failures.push(FailureEntry {
                    ticket_key: record.ticket_key.clone(),
                    action: ActionKind::Retire,
                    reason: e.to_string(),
                });
            }
        }
    }

    for key in &plan.to_purge {
        store.remove(key).await?;
        report.purged += 1;
    }

    for candidate in &plan.to_add {
        current += 1;
        progress.entry_processed("add", candidate.key().as_str(), current, total);
        publish_entry(
            candidate,
            None,
            ActionKind::Add,
            source,
            summarizer,
            publisher,
            store,
            &mut report,
        )
        .await?;
    }

    for (candidate, existing) in &plan.to_refresh {
        current += 1;
        progress.entry_processed("refresh", candidate.key().as_str(), current, total);
        publish_entry(
            candidate,
            Some(existing),
            ActionKind::Refresh,
            source,
            summarizer,
            publisher,
            store,
            &mut report,
        )
        .await?;
    }

    report.elapsed_ms = start.elapsed().as_millis() as u64;
    info!(
        added = report.added,
        refreshed = report.refreshed,
        retired = report.retired,
        purged = report.purged,
        unchanged = report.unchanged,
        failed = report.failed_count(),
        elapsed_ms = report.elapsed_ms,
        "plan executed"
    );
    Ok(report)
}

/// Summarize one candidate and push the artifact to the publishing backend,
/// committing the resulting record state either way.
#[allow(clippy::too_many_arguments)]
async fn publish_entry<S: Summarizer, P: Publisher>(
    candidate: &UltimateParent,
    existing: Option<&PublishedRecord>,
    action: ActionKind,
    source: &DescendantSource,
    summarizer: &S,
    publisher: &P,
    store: &Store,
    report: &mut ExecutionReport,
) -> Result<()> {
    let key = candidate.key().clone();
    let descendants = source.snapshot(candidate);
    let existing_ref = existing.and_then(|r| r.remote_ref.as_deref());

    let outcome: Result<(Artifact, Option<String>)> = async {
        let artifact = summarizer.summarize(&candidate.ticket, &descendants).await?;
        let remote_ref = publisher.publish(&key, &artifact, existing_ref).await?;
        Ok((artifact, remote_ref))
    }
    .await;

    match outcome {
        Ok((artifact, remote_ref)) => {
            let now = Utc::now();
            store
                .upsert(&PublishedRecord {
                    ticket_key: key.clone(),
                    descendant_count: candidate.descendant_count(),
                    fingerprint: candidate.fingerprint.clone(),
                    status: PublishStatus::Published,
                    remote_ref,
                    summary: Some(artifact.body),
                    last_error: None,
                    published_at: Some(now),
                    updated_at: now,
                })
                .await?;
            match action {
                ActionKind::Add => report.added += 1,
                ActionKind::Refresh => report.refreshed += 1,
                ActionKind::Retire => {}
            }
            info!(%key, action = action.as_str(), "published");
        }
        Err(e) if !e.is_fatal() => {
            warn!(%key, action = action.as_str(), error = %e, "entry failed");
            let failed = PublishedRecord {
                ticket_key: key.clone(),
                descendant_count: candidate.descendant_count(),
                fingerprint: candidate.fingerprint.clone(),
                status: PublishStatus::Failed,
                remote_ref: existing_ref.map(String::from),
                summary: existing.and_then(|r| r.summary.clone()),
                last_error: Some(e.to_string()),
                published_at: existing.and_then(|r| r.published_at),
                updated_at: Utc::now(),
            };
            store.upsert(&failed).await?;
            report.failures.push(FailureEntry {
                ticket_key: key,
                action,
                reason: e.to_string(),
            });
        }
        // Store and other systemic errors abort the run.
        Err(e) => return Err(e),
    }

    Ok(())
}

/// Transition a record to `failed` after an unsuccessful retraction.
async fn mark_failed(store: &Store, record: &PublishedRecord, reason: &str) -> Result<()> {
    store
        .upsert(&PublishedRecord {
            status: PublishStatus::Failed,
            last_error: Some(reason.to_string()),
            updated_at: Utc::now(),
            ..record.clone()
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use triagesync_shared::SyncError;
    use uuid::Uuid;

    use crate::reconcile::{ReconcileMode, plan};
    use crate::sync::SilentProgress;

    // -- mock backends ------------------------------------------------------

    /// Records every backend call; fails for keys listed in `fail_publish`
    /// or `fail_retract`.
    #[derive(Default)]
    struct MockBackend {
        calls: Mutex<Vec<String>>,
        fail_publish: Vec<String>,
        fail_retract: Vec<String>,
    }

    impl MockBackend {
        fn log(&self, entry: String) {
            self.calls.lock().expect("lock").push(entry);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("lock").clone()
        }
    }

    impl Summarizer for MockBackend {
        async fn summarize(
            &self,
            ticket: &Ticket,
            descendants: &[Descendant],
        ) -> triagesync_shared::Result<Artifact> {
            self.log(format!("summarize:{}", ticket.key));
            Ok(Artifact {
                title: ticket.title.clone(),
                body: format!("summary of {} ({} descendants)", ticket.key, descendants.len()),
            })
        }
    }

    impl Publisher for MockBackend {
        async fn publish(
            &self,
            key: &TicketKey,
            _artifact: &Artifact,
            _existing: Option<&str>,
        ) -> triagesync_shared::Result<Option<String>> {
            self.log(format!("publish:{key}"));
            if self.fail_publish.contains(&key.0) {
                return Err(SyncError::Backend("ingestion rejected".into()));
            }
            Ok(Some(format!("doc-{key}")))
        }

        async fn retract(
            &self,
            key: &TicketKey,
            _remote_ref: Option<&str>,
        ) -> triagesync_shared::Result<()> {
            self.log(format!("retract:{key}"));
            if self.fail_retract.contains(&key.0) {
                return Err(SyncError::Backend("retraction rejected".into()));
            }
            Ok(())
        }
    }

    // -- fixtures -----------------------------------------------------------

    async fn test_store() -> Store {
        let tmp = std::env::temp_dir().join(format!("ts_exec_{}.db", Uuid::now_v7()));
        Store::open(&tmp).await.expect("open test db")
    }

    fn candidate(key: &str, children: &[&str]) -> UltimateParent {
        UltimateParent {
            ticket: Ticket::new(key, format!("title {key}")),
            fingerprint: format!("fp-{key}-{}", children.len()),
            descendants: children.iter().map(|c| TicketKey::from(*c)).collect::<BTreeSet<_>>(),
        }
    }

    fn empty_source() -> DescendantSource {
        DescendantSource::new(&[], &[])
    }

    async fn seed_published(store: &Store, candidates: &[UltimateParent]) {
        for c in candidates {
            store
                .upsert(&PublishedRecord {
                    ticket_key: c.key().clone(),
                    descendant_count: c.descendant_count(),
                    fingerprint: c.fingerprint.clone(),
                    status: PublishStatus::Published,
                    remote_ref: Some(format!("doc-{}", c.key())),
                    summary: Some("old summary".into()),
                    last_error: None,
                    published_at: Some(Utc::now()),
                    updated_at: Utc::now(),
                })
                .await
                .expect("seed");
        }
    }

    // -- tests --------------------------------------------------------------

    #[tokio::test]
    async fn partial_failure_is_isolated() {
        let store = test_store().await;
        let ranked = vec![candidate("A", &[]), candidate("B", &[]), candidate("C", &[])];
        let plan = plan(&ReconcileMode::Init, Some(3), &ranked, &[]).expect("plan");

        let backend = MockBackend {
            fail_publish: vec!["B".into()],
            ..Default::default()
        };
        let report = execute(&plan, &empty_source(), &backend, &backend, &store, &SilentProgress)
            .await
            .expect("execute");

        assert_eq!(report.added, 2);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.failures[0].ticket_key.as_str(), "B");
        assert_eq!(report.failures[0].action, ActionKind::Add);

        let a = store.get_record(&TicketKey::from("A")).await.unwrap().unwrap();
        assert_eq!(a.status, PublishStatus::Published);
        assert_eq!(a.remote_ref.as_deref(), Some("doc-A"));
        let b = store.get_record(&TicketKey::from("B")).await.unwrap().unwrap();
        assert_eq!(b.status, PublishStatus::Failed);
        assert!(b.last_error.as_deref().unwrap_or("").contains("rejected"));
        let c = store.get_record(&TicketKey::from("C")).await.unwrap().unwrap();
        assert_eq!(c.status, PublishStatus::Published);
    }

    #[tokio::test]
    async fn retirements_run_before_additions() {
        let store = test_store().await;
        // E published but displaced; B takes its slot.
        let ranked = vec![candidate("A", &["a1"]), candidate("B", &[]), candidate("E", &[])];
        seed_published(&store, &[ranked[0].clone(), ranked[2].clone()]).await;
        let current = store.list_records().await.unwrap();

        let plan = plan(&ReconcileMode::Resize, Some(2), &ranked, &current).expect("plan");
        let backend = MockBackend::default();
        let report = execute(&plan, &empty_source(), &backend, &backend, &store, &SilentProgress)
            .await
            .expect("execute");

        assert_eq!(report.retired, 1);
        assert_eq!(report.added, 1);

        let calls = backend.calls();
        let first_publish = calls.iter().position(|c| c.starts_with("publish")).unwrap();
        let last_retract = calls.iter().rposition(|c| c.starts_with("retract")).unwrap();
        assert!(last_retract < first_publish, "retire must precede add: {calls:?}");

        assert!(store.get_record(&TicketKey::from("E")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_retraction_marks_record() {
        let store = test_store().await;
        let ranked = vec![candidate("A", &[])];
        let displaced = candidate("Z", &[]);
        seed_published(&store, &[ranked[0].clone(), displaced]).await;
        let current = store.list_records().await.unwrap();

        let plan = plan(&ReconcileMode::Resize, Some(1), &ranked, &current).expect("plan");
        let backend = MockBackend {
            fail_retract: vec!["Z".into()],
            ..Default::default()
        };
        let report = execute(&plan, &empty_source(), &backend, &backend, &store, &SilentProgress)
            .await
            .expect("execute");

        assert_eq!(report.retired, 0);
        assert_eq!(report.failed_count(), 1);
        let z = store.get_record(&TicketKey::from("Z")).await.unwrap().unwrap();
        assert_eq!(z.status, PublishStatus::Failed);
    }

    #[tokio::test]
    async fn refresh_passes_existing_reference_and_updates_fingerprint() {
        let store = test_store().await;
        let old = candidate("A", &[]);
        seed_published(&store, &[old]).await;
        let current = store.list_records().await.unwrap();

        // Same ticket, new descendant composition.
        let ranked = vec![candidate("A", &["a1", "a2"])];
        let plan = plan(&ReconcileMode::Update, Some(1), &ranked, &current).expect("plan");
        assert_eq!(plan.to_refresh.len(), 1);

        let backend = MockBackend::default();
        let report = execute(&plan, &empty_source(), &backend, &backend, &store, &SilentProgress)
            .await
            .expect("execute");
        assert_eq!(report.refreshed, 1);

        let a = store.get_record(&TicketKey::from("A")).await.unwrap().unwrap();
        assert_eq!(a.descendant_count, 2);
        assert_eq!(a.fingerprint, ranked[0].fingerprint);
    }

    #[tokio::test]
    async fn converged_plan_touches_nothing() {
        let store = test_store().await;
        let ranked = vec![candidate("A", &[]), candidate("B", &[])];
        seed_published(&store, &ranked).await;
        let current = store.list_records().await.unwrap();

        let plan = plan(&ReconcileMode::Update, Some(2), &ranked, &current).expect("plan");
        let backend = MockBackend::default();
        let report = execute(&plan, &empty_source(), &backend, &backend, &store, &SilentProgress)
            .await
            .expect("execute");

        assert_eq!(report.processed_count(), 0);
        assert_eq!(report.unchanged, 2);
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn descendant_snapshot_orders_by_generation() {
        let tickets = vec![
            Ticket::new("A", "parent"),
            Ticket::new("B", "child b"),
            Ticket::new("C", "child c"),
            Ticket::new("D", "grandchild d"),
        ];
        let links = vec![
            DuplicateLink::new("B", "A"),
            DuplicateLink::new("C", "A"),
            DuplicateLink::new("D", "B"),
        ];
        let source = DescendantSource::new(&tickets, &links);
        let parent = candidate("A", &["B", "C", "D"]);

        let snapshot = source.snapshot(&parent);
        let described: Vec<(String, u32)> = snapshot
            .iter()
            .map(|d| (d.ticket.key.to_string(), d.generation))
            .collect();
        assert_eq!(
            described,
            vec![
                ("B".to_string(), 1),
                ("C".to_string(), 1),
                ("D".to_string(), 2)
            ]
        );
    }

    #[test]
    fn descendant_snapshot_skips_unknown_branches() {
        // Link graph mentions a key outside the resolved descendant set;
        // the snapshot stays inside the set.
        let links = vec![
            DuplicateLink::new("B", "A"),
            DuplicateLink::new("X", "A"),
        ];
        let source = DescendantSource::new(&[Ticket::new("B", "b")], &links);
        let parent = candidate("A", &["B"]);

        let snapshot = source.snapshot(&parent);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].ticket.key.as_str(), "B");
    }
}
