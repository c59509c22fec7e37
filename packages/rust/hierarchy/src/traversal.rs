//! Duplicate-graph indexing and descendant traversal.
//!
//! The link index is built once per [`resolve`](crate::resolve) invocation and
//! discarded with it — never a process-lifetime cache, so repeated resolutions
//! over the same inputs stay deterministic.

use std::collections::{BTreeSet, HashMap, HashSet};

use triagesync_shared::{DuplicateLink, TicketKey};

/// Child/outward lookup index over one snapshot of duplicate links.
pub(crate) struct LinkIndex {
    /// target -> sources that duplicate it (direct children).
    children: HashMap<TicketKey, BTreeSet<TicketKey>>,
    /// Tickets with at least one outward duplicate link.
    has_outward: HashSet<TicketKey>,
}

impl LinkIndex {
    pub(crate) fn build(links: &[DuplicateLink]) -> Self {
        let mut children: HashMap<TicketKey, BTreeSet<TicketKey>> = HashMap::new();
        let mut has_outward = HashSet::new();

        for link in links {
            if link.source == link.target {
                // Self-loops carry no hierarchy information.
                continue;
            }
            children
                .entry(link.target.clone())
                .or_default()
                .insert(link.source.clone());
            has_outward.insert(link.source.clone());
        }

        Self {
            children,
            has_outward,
        }
    }

    /// Whether the ticket duplicates some other ticket.
    pub(crate) fn has_outward(&self, key: &TicketKey) -> bool {
        self.has_outward.contains(key)
    }

    /// Direct children of a ticket, in key order.
    pub(crate) fn children_of(&self, key: &TicketKey) -> impl Iterator<Item = &TicketKey> {
        self.children.get(key).into_iter().flatten()
    }
}

/// Outcome of one descendant traversal.
pub(crate) enum Traversal {
    /// Transitive closure of inward links; never contains the root.
    Resolved(BTreeSet<TicketKey>),
    /// The inward graph loops back onto the traversal path.
    CycleDetected(Vec<TicketKey>),
}

/// Collect the descendant set of `root` by explicit-stack depth-first
/// traversal of inward duplicate links.
///
/// A node reached twice through different branches (a diamond) is fine and
/// visited once; a node revisited while still on the current path is a cycle
/// and aborts the traversal with the participating keys.
pub(crate) fn collect_descendants(root: &TicketKey, index: &LinkIndex) -> Traversal {
    enum Frame<'a> {
        Enter(&'a TicketKey),
        Exit(&'a TicketKey),
    }

    let mut visited: BTreeSet<TicketKey> = BTreeSet::new();
    let mut on_path: HashSet<&TicketKey> = HashSet::new();
    let mut stack = vec![Frame::Enter(root)];

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter(key) => {
                if on_path.contains(key) {
                    let mut participants: Vec<TicketKey> =
                        on_path.iter().map(|k| (*k).clone()).collect();
                    participants.sort();
                    return Traversal::CycleDetected(participants);
                }
                if visited.contains(key) {
                    continue;
                }
                visited.insert(key.clone());
                on_path.insert(key);
                stack.push(Frame::Exit(key));
                for child in index.children_of(key) {
                    stack.push(Frame::Enter(child));
                }
            }
            Frame::Exit(key) => {
                on_path.remove(key);
            }
        }
    }

    visited.remove(root);
    Traversal::Resolved(visited)
}
