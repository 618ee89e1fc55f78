//! The solver's three memo tables.
//!
//! Jump functions are the per-procedure path-edge store and the only table
//! the garbage collector ever sweeps. End summaries memoize exit behavior per
//! (procedure, entry fact) for reuse across call sites. Incoming records link
//! a callee entry context back to the call sites that produced it, so a
//! summary finished after a call site was processed still reaches it.
//!
//! All three are `DashMap`-backed; every mutation is an atomic
//! insert-if-absent so concurrent insertion of an equal entry converges on
//! one canonical object.

use dashmap::DashMap;

use crate::program::{NodeId, ProcId};
use crate::solver::path_edge::{EdgeKey, PathEdge};
use crate::taint::{FactArena, FactId, FactKey};

/// Per-procedure path-edge store.
#[derive(Debug, Default)]
pub struct JumpFunctions {
    edges: DashMap<ProcId, DashMap<EdgeKey, PathEdge>>,
}

impl JumpFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic insert-if-absent. Returns `None` when the edge was new and a
    /// task must be scheduled; otherwise the already-stored edge, whose
    /// target fact absorbs the new arrival as a neighbor.
    pub fn insert_if_absent(&self, proc: ProcId, key: EdgeKey, edge: PathEdge) -> Option<PathEdge> {
        let per_proc = self.edges.entry(proc).or_default();
        let result = match per_proc.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(existing) => Some(*existing.get()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(edge);
                None
            }
        };
        result
    }

    /// Drops every stored edge of a procedure. Returns how many were removed.
    /// A later re-propagation simply repopulates the entry.
    pub fn remove_proc(&self, proc: ProcId) -> usize {
        self.edges.remove(&proc).map(|(_, m)| m.len()).unwrap_or(0)
    }

    pub fn edge_count(&self) -> usize {
        self.edges.iter().map(|e| e.value().len()).sum()
    }

    pub fn proc_edge_count(&self, proc: ProcId) -> usize {
        self.edges.get(&proc).map(|m| m.len()).unwrap_or(0)
    }
}

/// One memoized exit behavior: reaching `exit_node` with `exit_fact` when the
/// procedure was entered with `entry_fact`.
#[derive(Debug, Clone, Copy)]
pub struct SummaryEntry {
    pub exit_node: NodeId,
    pub exit_fact: FactId,
    pub entry_fact: FactId,
}

/// Outcome of an end-summary registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryRegistration {
    /// First registration of this exit behavior; callers must be notified.
    New,
    /// An equal summary already exists; the arrival was merged into its
    /// neighbor set and callers were already notified.
    Merged,
}

/// End-summary store, keyed by (procedure, entry-fact identity). Never
/// registered for the zero fact; zero-context exits go through the
/// unbalanced-return path instead.
#[derive(Debug, Default)]
pub struct EndSummaries {
    summaries: DashMap<(ProcId, FactKey), DashMap<(NodeId, FactKey), SummaryEntry>>,
}

impl EndSummaries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an exit behavior; first registration wins. On a duplicate,
    /// the new exit fact is merged as a neighbor of the stored one (summary
    /// joins are essential and bypass the neighbor cap).
    pub fn register(
        &self,
        arena: &FactArena,
        proc: ProcId,
        entry_fact: FactId,
        exit_node: NodeId,
        exit_fact: FactId,
    ) -> SummaryRegistration {
        let per_entry = self.summaries.entry((proc, arena.key(entry_fact))).or_default();
        let result = match per_entry.entry((exit_node, arena.key(exit_fact))) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                arena.add_neighbor(existing.get().exit_fact, exit_fact, -1, true);
                SummaryRegistration::Merged
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(SummaryEntry {
                    exit_node,
                    exit_fact,
                    entry_fact,
                });
                SummaryRegistration::New
            }
        };
        result
    }

    /// Snapshot of the exit behaviors recorded so far for an entry context.
    pub fn lookup(&self, proc: ProcId, entry_key: &FactKey) -> Vec<SummaryEntry> {
        self.summaries
            .get(&(proc, entry_key.clone()))
            .map(|m| m.iter().map(|e| *e.value()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.summaries.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One caller context registered at a call site.
#[derive(Debug, Clone, Copy)]
pub struct IncomingRecord {
    /// Entry fact of the calling procedure.
    pub caller_d1: FactId,
    /// Fact at the call site that produced the callee entry fact.
    pub caller_d2: FactId,
}

/// Incoming-edge store: (callee, callee-entry fact) -> call site -> caller
/// contexts. Never swept.
#[derive(Debug, Default)]
pub struct IncomingTable {
    records: DashMap<(ProcId, FactKey), DashMap<NodeId, Vec<IncomingRecord>>>,
}

impl IncomingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a caller context. Returns false when a structurally equal
    /// record already exists, in which case the caller side has nothing new
    /// to do for this callee entry.
    pub fn register(
        &self,
        arena: &FactArena,
        callee: ProcId,
        entry_fact: FactId,
        call_site: NodeId,
        caller_d1: FactId,
        caller_d2: FactId,
    ) -> bool {
        let per_entry = self.records.entry((callee, arena.key(entry_fact))).or_default();
        let mut per_site = per_entry.entry(call_site).or_default();
        let duplicate = per_site.iter().any(|r| {
            arena.structurally_equal(r.caller_d1, caller_d1)
                && arena.structurally_equal(r.caller_d2, caller_d2)
        });
        if duplicate {
            return false;
        }
        per_site.push(IncomingRecord {
            caller_d1,
            caller_d2,
        });
        true
    }

    /// All caller contexts registered for an entry context, grouped by call
    /// site.
    pub fn lookup(&self, callee: ProcId, entry_key: &FactKey) -> Vec<(NodeId, Vec<IncomingRecord>)> {
        self.records
            .get(&(callee, entry_key.clone()))
            .map(|m| m.iter().map(|e| (*e.key(), e.value().clone())).collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
