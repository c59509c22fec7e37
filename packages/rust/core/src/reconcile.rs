//! Plan computation: diff the desired published set against the current one.
//!
//! Planning is pure — it never touches the store or the backends — so a plan
//! can be computed, inspected, and discarded freely. The defining property of
//! the update path: planning against a store that already matches the ranked
//! top-N yields a plan with nothing to do.

use std::collections::{BTreeMap, HashMap};

use triagesync_hierarchy::UltimateParent;
use triagesync_shared::{PublishedRecord, Result, SyncError, TicketKey};

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

/// What kind of reconciliation run this is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Start over: retire everything currently published, then publish the
    /// top `target_size` candidates.
    Init,
    /// Converge on the top-N, refreshing entries whose descendant
    /// composition changed. Without an explicit size, holds the current
    /// published count.
    Update,
    /// Update with a different target size; shrinking retires the
    /// lowest-ranked entries first.
    Resize,
    /// Refresh every published entry regardless of fingerprints.
    ForceRefresh,
    /// Diagnostic run restricted to a single ticket, bypassing ranking.
    TestUpdate(TicketKey),
}

impl ReconcileMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Update => "update",
            Self::Resize => "resize",
            Self::ForceRefresh => "force-refresh",
            Self::TestUpdate(_) => "test-update",
        }
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// The per-run action assignment. The four ticket sets are disjoint.
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    /// Published entries to retract, lowest-ranked first. Always applied
    /// before additions so a shrink never transiently exceeds the target.
    pub to_retire: Vec<PublishedRecord>,
    /// Candidates to summarize and publish for the first time.
    pub to_add: Vec<UltimateParent>,
    /// Candidates to re-summarize and re-publish, with their existing record.
    pub to_refresh: Vec<(UltimateParent, PublishedRecord)>,
    /// Published entries left exactly as they are.
    pub unchanged: Vec<TicketKey>,
    /// Stale local rows (failed/pending, no longer wanted) to drop from the
    /// store without any backend call.
    pub to_purge: Vec<TicketKey>,
    /// Effective target size this plan converges on.
    pub target_size: usize,
}

impl ReconcilePlan {
    /// True when executing the plan would perform no backend operation.
    pub fn is_empty(&self) -> bool {
        self.to_retire.is_empty() && self.to_add.is_empty() && self.to_refresh.is_empty()
    }

    /// Number of entries that will drive backend calls.
    pub fn entry_count(&self) -> usize {
        self.to_retire.len() + self.to_add.len() + self.to_refresh.len()
    }
}

/// Compute the reconciliation plan for one run.
///
/// `ranked` is the resolver's full priority-ordered candidate list;
/// `current` is every record in the store, active or not.
pub fn plan(
    mode: &ReconcileMode,
    target_size: Option<usize>,
    ranked: &[UltimateParent],
    current: &[PublishedRecord],
) -> Result<ReconcilePlan> {
    // Only records that actually made it to the remote knowledge base count
    // as published; failed and pending rows retry as additions.
    let active: BTreeMap<&TicketKey, &PublishedRecord> = current
        .iter()
        .filter(|r| r.is_active())
        .map(|r| (&r.ticket_key, r))
        .collect();
    let inactive: Vec<&PublishedRecord> = current.iter().filter(|r| !r.is_active()).collect();

    match mode {
        ReconcileMode::Init => {
            let size = target_size.ok_or_else(|| {
                SyncError::validation("init requires an explicit target size")
            })?;
            let desired = &ranked[..size.min(ranked.len())];

            let mut plan = ReconcilePlan {
                to_retire: active.values().map(|r| (*r).clone()).collect(),
                to_add: desired.to_vec(),
                to_purge: inactive.iter().map(|r| r.ticket_key.clone()).collect(),
                target_size: size,
                ..Default::default()
            };
            order_retirements(&mut plan.to_retire, ranked);
            Ok(plan)
        }

        ReconcileMode::Update | ReconcileMode::Resize | ReconcileMode::ForceRefresh => {
            let size = target_size.unwrap_or(active.len());
            let desired = &ranked[..size.min(ranked.len())];
            let force = matches!(mode, ReconcileMode::ForceRefresh);

            let mut plan = ReconcilePlan {
                target_size: size,
                ..Default::default()
            };

            for candidate in desired {
                match active.get(candidate.key()) {
                    None => plan.to_add.push(candidate.clone()),
                    Some(record) => {
                        let changed = record.fingerprint != candidate.fingerprint
                            || record.descendant_count != candidate.descendant_count();
                        if force || changed {
                            plan.to_refresh.push((candidate.clone(), (*record).clone()));
                        } else {
                            plan.unchanged.push(candidate.key().clone());
                        }
                    }
                }
            }

            let desired_keys: HashMap<&TicketKey, ()> =
                desired.iter().map(|c| (c.key(), ())).collect();
            plan.to_retire = active
                .values()
                .filter(|r| !desired_keys.contains_key(&r.ticket_key))
                .map(|r| (*r).clone())
                .collect();
            order_retirements(&mut plan.to_retire, ranked);

            plan.to_purge = inactive
                .iter()
                .filter(|r| !desired_keys.contains_key(&r.ticket_key))
                .map(|r| r.ticket_key.clone())
                .collect();

            Ok(plan)
        }

        ReconcileMode::TestUpdate(key) => {
            let candidate = ranked
                .iter()
                .find(|c| c.key() == key)
                .ok_or_else(|| {
                    SyncError::validation(format!(
                        "{key} did not resolve as an ultimate parent"
                    ))
                })?
                .clone();

            let mut plan = ReconcilePlan {
                target_size: active.len().max(1),
                ..Default::default()
            };
            match active.get(key) {
                Some(record) => plan.to_refresh.push((candidate, (*record).clone())),
                None => plan.to_add.push(candidate),
            }
            Ok(plan)
        }
    }
}

/// Order retirements lowest-ranked first; entries that vanished from the
/// ranking entirely go before everything else.
fn order_retirements(to_retire: &mut [PublishedRecord], ranked: &[UltimateParent]) {
    let rank: HashMap<&TicketKey, usize> = ranked
        .iter()
        .enumerate()
        .map(|(i, c)| (c.key(), i))
        .collect();
    to_retire.sort_by(|a, b| {
        let ra = rank.get(&a.ticket_key).copied().unwrap_or(usize::MAX);
        let rb = rank.get(&b.ticket_key).copied().unwrap_or(usize::MAX);
        rb.cmp(&ra).then_with(|| a.ticket_key.cmp(&b.ticket_key))
    });
}
