//! End-to-end reconciliation run: fetch → resolve → plan → execute.
//!
//! A run is a single synchronous batch. Fetch failures abort before anything
//! is mutated; store failures abort wherever they occur; backend failures
//! stay per-entry inside the execution report.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use tracing::{info, instrument};

use triagesync_backends::{Publisher, Summarizer};
use triagesync_hierarchy::{ResolveDiagnostic, resolve};
use triagesync_shared::{DuplicateLink, Result, Ticket, TicketKey};
use triagesync_store::Store;
use triagesync_tracker::TrackerClient;

use crate::execute::{DescendantSource, ExecutionReport, execute};
use crate::reconcile::{ReconcileMode, ReconcilePlan, plan};

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for reporting run status to a front end.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called per ticket while expanding duplicate links.
    fn ticket_expanded(&self, key: &str, current: usize);
    /// Called per plan entry during execution.
    fn entry_processed(&self, action: &str, key: &str, current: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, report: &ExecutionReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn ticket_expanded(&self, _key: &str, _current: usize) {}
    fn entry_processed(&self, _action: &str, _key: &str, _current: usize, _total: usize) {}
    fn done(&self, _report: &ExecutionReport) {}
}

// ---------------------------------------------------------------------------
// Run options & outcome
// ---------------------------------------------------------------------------

/// Options for one reconciliation run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub mode: ReconcileMode,
    /// Explicit target size; update/force-refresh default to holding the
    /// current published count when absent.
    pub target_size: Option<usize>,
}

/// Plan shape, for reporting before/after execution.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PlanCounts {
    pub to_add: usize,
    pub to_refresh: usize,
    pub to_retire: usize,
    pub unchanged: usize,
}

impl From<&ReconcilePlan> for PlanCounts {
    fn from(plan: &ReconcilePlan) -> Self {
        Self {
            to_add: plan.to_add.len(),
            to_refresh: plan.to_refresh.len(),
            to_retire: plan.to_retire.len(),
            unchanged: plan.unchanged.len(),
        }
    }
}

/// Result of one reconciliation run.
#[derive(Debug)]
pub struct SyncOutcome {
    /// Persisted run id.
    pub run_id: String,
    /// How many ultimate parents the resolver ranked.
    pub total_candidates: usize,
    /// Integrity findings from resolution.
    pub diagnostics: Vec<ResolveDiagnostic>,
    /// What the plan decided.
    pub planned: PlanCounts,
    /// What actually happened.
    pub report: ExecutionReport,
    /// Total elapsed time.
    pub elapsed: std::time::Duration,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Run one full reconciliation.
///
/// 1. Fetch candidate tickets (or the single test ticket)
/// 2. Expand duplicate links transitively over the inward direction
/// 3. Resolve ultimate parents and rank them
/// 4. Diff against the store's published records
/// 5. Execute the plan and persist the run report
#[instrument(skip_all, fields(mode = options.mode.name()))]
pub async fn run_sync<S: Summarizer, P: Publisher>(
    options: &SyncOptions,
    tracker: &TrackerClient,
    summarizer: &S,
    publisher: &P,
    store: &Store,
    progress: &dyn ProgressReporter,
) -> Result<SyncOutcome> {
    let start = Instant::now();

    // --- Fetch ---
    progress.phase("Fetching tickets");
    let search_tickets = match &options.mode {
        ReconcileMode::TestUpdate(key) => vec![tracker.fetch_ticket(key).await?],
        _ => tracker.fetch_candidate_tickets().await?,
    };
    info!(count = search_tickets.len(), "candidate tickets fetched");

    // --- Expand links ---
    progress.phase("Expanding duplicate links");
    let (tickets, links) = expand_links(tracker, &search_tickets, progress).await?;

    // --- Resolve ---
    progress.phase("Resolving hierarchy");
    let resolution = resolve(&search_tickets, &links);
    info!(
        candidates = resolution.candidates.len(),
        diagnostics = resolution.diagnostics.len(),
        "hierarchy resolved"
    );

    // --- Plan ---
    progress.phase("Loading published state");
    let current = store.list_records().await?;
    let plan = plan(
        &options.mode,
        options.target_size,
        &resolution.candidates,
        &current,
    )?;
    let planned = PlanCounts::from(&plan);
    info!(
        to_add = planned.to_add,
        to_refresh = planned.to_refresh,
        to_retire = planned.to_retire,
        unchanged = planned.unchanged,
        target = plan.target_size,
        "plan computed"
    );

    // --- Execute ---
    progress.phase("Executing plan");
    let run_id = store
        .begin_run(options.mode.name(), Some(plan.target_size))
        .await?;
    let source = DescendantSource::new(&tickets, &links);
    let report = execute(&plan, &source, summarizer, publisher, store, progress).await?;

    let report_json =
        serde_json::to_string(&report).unwrap_or_else(|_| "{}".to_string());
    store.finish_run(&run_id, &report_json).await?;
    progress.done(&report);

    Ok(SyncOutcome {
        run_id,
        total_candidates: resolution.candidates.len(),
        diagnostics: resolution.diagnostics,
        planned,
        report,
        elapsed: start.elapsed(),
    })
}

/// Walk the inward duplicate direction transitively, collecting links and
/// ticket snapshots. Each ticket is expanded at most once, so link cycles
/// in the source data cannot loop the walk.
async fn expand_links(
    tracker: &TrackerClient,
    roots: &[Ticket],
    progress: &dyn ProgressReporter,
) -> Result<(Vec<Ticket>, Vec<DuplicateLink>)> {
    let mut tickets: HashMap<TicketKey, Ticket> = roots
        .iter()
        .map(|t| (t.key.clone(), t.clone()))
        .collect();
    let mut links: Vec<DuplicateLink> = Vec::new();
    let mut queue: VecDeque<TicketKey> = roots.iter().map(|t| t.key.clone()).collect();
    let mut expanded: HashSet<TicketKey> = HashSet::new();
    let mut count = 0usize;

    while let Some(key) = queue.pop_front() {
        if !expanded.insert(key.clone()) {
            continue;
        }
        count += 1;
        progress.ticket_expanded(key.as_str(), count);

        let expansion = tracker.fetch_duplicate_links(&key).await?;
        for stub in expansion.tickets {
            tickets.entry(stub.key.clone()).or_insert(stub);
        }
        for target in expansion.links.outward {
            links.push(DuplicateLink::new(key.clone(), target));
        }
        for child in expansion.links.inward {
            links.push(DuplicateLink::new(child.clone(), key.clone()));
            queue.push_back(child);
        }
    }

    // Stable link order keeps resolution inputs reproducible run to run.
    links.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));
    links.dedup();

    Ok((tickets.into_values().collect(), links))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use uuid::Uuid;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use triagesync_backends::{Artifact, Descendant};
    use triagesync_shared::{PublishStatus, RetryPolicy, SyncError, TrackerConfig};

    struct OkBackend {
        published: Mutex<Vec<String>>,
    }

    impl OkBackend {
        fn new() -> Self {
            Self {
                published: Mutex::new(Vec::new()),
            }
        }
    }

    impl Summarizer for OkBackend {
        async fn summarize(
            &self,
            ticket: &Ticket,
            descendants: &[Descendant],
        ) -> Result<Artifact> {
            Ok(Artifact {
                title: ticket.title.clone(),
                body: format!("{} with {} descendants", ticket.key, descendants.len()),
            })
        }
    }

    impl Publisher for OkBackend {
        async fn publish(
            &self,
            key: &TicketKey,
            _artifact: &Artifact,
            _existing: Option<&str>,
        ) -> Result<Option<String>> {
            self.published.lock().expect("lock").push(key.to_string());
            Ok(Some(format!("doc-{key}")))
        }

        async fn retract(&self, _key: &TicketKey, _remote_ref: Option<&str>) -> Result<()> {
            Ok(())
        }
    }

    async fn test_store() -> Store {
        let tmp = std::env::temp_dir().join(format!("ts_sync_{}.db", Uuid::now_v7()));
        Store::open(&tmp).await.expect("open test db")
    }

    fn tracker_for(server: &MockServer) -> TrackerClient {
        let config = TrackerConfig {
            base_url: server.uri(),
            username: "sync-bot".into(),
            parent_query: "labels = feedback-parent".into(),
            page_size: 50,
            ..Default::default()
        };
        TrackerClient::new(&config, "token".into(), RetryPolicy::immediate(1)).expect("client")
    }

    fn issue(key: &str, summary: &str) -> serde_json::Value {
        json!({"key": key, "fields": {"summary": summary}})
    }

    fn issue_with_links(key: &str, inward: &[&str], outward: &[&str]) -> serde_json::Value {
        let mut links: Vec<serde_json::Value> = inward
            .iter()
            .map(|k| {
                json!({"type": {"name": "Duplicate"},
                       "inwardIssue": {"key": k, "fields": {"summary": format!("dupe {k}")}}})
            })
            .collect();
        links.extend(outward.iter().map(|k| {
            json!({"type": {"name": "Duplicate"},
                   "outwardIssue": {"key": k, "fields": {"summary": format!("target {k}")}}})
        }));
        json!({"key": key, "fields": {"summary": format!("summary {key}"), "issuelinks": links}})
    }

    async fn mount_graph(server: &MockServer) {
        // Search returns three parents; B2 duplicates A so it is filtered.
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "startAt": 0, "maxResults": 50, "total": 3,
                "issues": [
                    issue("A", "parent a"),
                    issue("B", "parent b"),
                    issue("B2", "secretly a dupe")
                ]
            })))
            .mount(server)
            .await;

        // A has two children, one of which has its own child.
        for (key, inward, outward) in [
            ("A", vec!["A1", "A2"], vec![]),
            ("B", vec!["B1"], vec![]),
            ("B2", vec![], vec!["A"]),
            ("A1", vec!["A1a"], vec!["A"]),
            ("A2", vec![], vec!["A"]),
            ("B1", vec![], vec!["B"]),
            ("A1a", vec![], vec!["A1"]),
        ] {
            Mock::given(method("GET"))
                .and(path(format!("/rest/api/2/issue/{key}")))
                .and(query_param("fields", "summary,issuelinks"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(issue_with_links(key, &inward, &outward)),
                )
                .mount(server)
                .await;
        }
    }

    #[tokio::test]
    async fn init_publishes_ranked_top_n() {
        let server = MockServer::start().await;
        mount_graph(&server).await;
        let store = test_store().await;
        let tracker = tracker_for(&server);
        let backend = OkBackend::new();

        let outcome = run_sync(
            &SyncOptions {
                mode: ReconcileMode::Init,
                target_size: Some(2),
            },
            &tracker,
            &backend,
            &backend,
            &store,
            &SilentProgress,
        )
        .await
        .expect("run");

        // B2 duplicates A, so it drops out of the candidate list and counts
        // toward A's descendants instead.
        assert_eq!(outcome.total_candidates, 2);
        assert_eq!(outcome.report.added, 2);
        assert_eq!(outcome.report.failed_count(), 0);

        let records = store.list_records().await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.status == PublishStatus::Published));

        let a = store.get_record(&TicketKey::from("A")).await.unwrap().unwrap();
        // A1, A2, A1a, B2.
        assert_eq!(a.descendant_count, 4);

        let last = store.last_run().await.unwrap().unwrap();
        assert_eq!(last.id, outcome.run_id);
        assert_eq!(last.mode, "init");
    }

    #[tokio::test]
    async fn second_update_run_is_idempotent() {
        let server = MockServer::start().await;
        mount_graph(&server).await;
        let store = test_store().await;
        let tracker = tracker_for(&server);
        let backend = OkBackend::new();

        run_sync(
            &SyncOptions {
                mode: ReconcileMode::Init,
                target_size: Some(2),
            },
            &tracker,
            &backend,
            &backend,
            &store,
            &SilentProgress,
        )
        .await
        .expect("init run");

        let publishes_after_init = backend.published.lock().unwrap().len();

        let outcome = run_sync(
            &SyncOptions {
                mode: ReconcileMode::Update,
                target_size: None,
            },
            &tracker,
            &backend,
            &backend,
            &store,
            &SilentProgress,
        )
        .await
        .expect("update run");

        assert_eq!(outcome.planned.to_add, 0);
        assert_eq!(outcome.planned.to_refresh, 0);
        assert_eq!(outcome.planned.to_retire, 0);
        assert_eq!(outcome.planned.unchanged, 2);
        assert_eq!(backend.published.lock().unwrap().len(), publishes_after_init);
    }

    #[tokio::test]
    async fn fetch_failure_aborts_before_mutation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = test_store().await;
        let backend = OkBackend::new();
        let err = run_sync(
            &SyncOptions {
                mode: ReconcileMode::Update,
                target_size: Some(5),
            },
            &tracker_for(&server),
            &backend,
            &backend,
            &store,
            &SilentProgress,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SyncError::Tracker(_)));
        assert!(store.list_records().await.unwrap().is_empty());
        assert!(store.last_run().await.unwrap().is_none());
        assert!(backend.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_targets_one_ticket() {
        let server = MockServer::start().await;
        mount_graph(&server).await;
        // Single-issue fetch for the full snapshot.
        Mock::given(method("GET"))
            .and(path("/rest/api/2/issue/B"))
            .and(query_param(
                "fields",
                "summary,description,status,created,resolutiondate",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(issue("B", "parent b")))
            .mount(&server)
            .await;

        let store = test_store().await;
        let backend = OkBackend::new();
        let outcome = run_sync(
            &SyncOptions {
                mode: ReconcileMode::TestUpdate(TicketKey::from("B")),
                target_size: None,
            },
            &tracker_for(&server),
            &backend,
            &backend,
            &store,
            &SilentProgress,
        )
        .await
        .expect("test-update run");

        assert_eq!(outcome.report.added, 1);
        assert_eq!(backend.published.lock().unwrap().as_slice(), ["B"]);
    }
}
