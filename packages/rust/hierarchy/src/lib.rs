//! Ultimate-parent resolution over the duplicate-link graph.
//!
//! Given one snapshot of tickets and duplicate links, [`resolve`] filters out
//! every ticket that duplicates another, computes each remaining candidate's
//! transitive descendant set, and returns the candidates in a deterministic
//! priority order (descendant count descending, ticket key ascending).
//!
//! Resolution is a pure function of its inputs: it holds no state across
//! calls, so repeated invocations against the same snapshot always produce
//! the same ranking — the property the reconciliation diff depends on.

mod traversal;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use triagesync_shared::{DuplicateLink, Ticket, TicketKey};

use crate::traversal::{LinkIndex, Traversal, collect_descendants};

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// A ticket with no outward duplicate link, annotated with its resolved
/// descendant closure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UltimateParent {
    /// The candidate ticket snapshot.
    pub ticket: Ticket,
    /// Transitive closure of inward duplicate links; never contains the
    /// ticket itself.
    pub descendants: BTreeSet<TicketKey>,
    /// SHA-256 over the ticket key and the sorted descendant keys; changes
    /// exactly when the descendant composition changes.
    pub fingerprint: String,
}

impl UltimateParent {
    pub fn key(&self) -> &TicketKey {
        &self.ticket.key
    }

    pub fn descendant_count(&self) -> usize {
        self.descendants.len()
    }
}

/// Data-integrity findings surfaced alongside the ranked list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolveDiagnostic {
    /// The candidate's inward graph loops back on itself; the candidate was
    /// excluded from the ranking.
    CycleDetected {
        candidate: TicketKey,
        participants: Vec<TicketKey>,
    },
    /// Tickets that neither qualify as ultimate parents nor appear under any
    /// resolved parent — mutual-duplicate clusters with no terminus.
    UnresolvedCluster { tickets: Vec<TicketKey> },
}

/// Result of one resolution pass.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Ultimate parents, highest priority first. Callers truncate to top-N;
    /// the resolver never does.
    pub candidates: Vec<UltimateParent>,
    pub diagnostics: Vec<ResolveDiagnostic>,
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve the ultimate parents of one ticket/link snapshot.
pub fn resolve(tickets: &[Ticket], links: &[DuplicateLink]) -> Resolution {
    let index = LinkIndex::build(links);
    let mut candidates = Vec::new();
    let mut diagnostics = Vec::new();
    let mut covered: BTreeSet<TicketKey> = BTreeSet::new();

    for ticket in tickets {
        if index.has_outward(&ticket.key) {
            continue;
        }

        match collect_descendants(&ticket.key, &index) {
            Traversal::Resolved(descendants) => {
                covered.insert(ticket.key.clone());
                covered.extend(descendants.iter().cloned());
                let fingerprint = fingerprint(&ticket.key, &descendants);
                candidates.push(UltimateParent {
                    ticket: ticket.clone(),
                    descendants,
                    fingerprint,
                });
            }
            Traversal::CycleDetected(participants) => {
                warn!(
                    candidate = %ticket.key,
                    participants = ?participants,
                    "duplicate-link cycle detected, excluding candidate"
                );
                diagnostics.push(ResolveDiagnostic::CycleDetected {
                    candidate: ticket.key.clone(),
                    participants,
                });
            }
        }
    }

    // Tickets left outside every resolved hierarchy are mutual-duplicate
    // clusters that never reach a terminus. Report them so no ticket drops
    // out of a run silently.
    let orphans: Vec<TicketKey> = tickets
        .iter()
        .map(|t| t.key.clone())
        .filter(|key| !covered.contains(key))
        .filter(|key| {
            !diagnostics.iter().any(|d| {
                matches!(d, ResolveDiagnostic::CycleDetected { candidate, .. } if candidate == key)
            })
        })
        .collect();
    if !orphans.is_empty() {
        warn!(tickets = ?orphans, "tickets resolve to no ultimate parent");
        diagnostics.push(ResolveDiagnostic::UnresolvedCluster { tickets: orphans });
    }

    candidates.sort_by(|a, b| {
        b.descendant_count()
            .cmp(&a.descendant_count())
            .then_with(|| a.ticket.key.cmp(&b.ticket.key))
    });

    Resolution {
        candidates,
        diagnostics,
    }
}

/// Fingerprint of a candidate's descendant-set composition.
fn fingerprint(key: &TicketKey, descendants: &BTreeSet<TicketKey>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_str().as_bytes());
    for descendant in descendants {
        hasher.update(b"\n");
        hasher.update(descendant.as_str().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
