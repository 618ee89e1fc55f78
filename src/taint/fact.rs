//! Taint facts and the shared fact arena.
//!
//! Facts form a highly aliased, acyclic graph through predecessor and
//! neighbor links (witness-path bookkeeping). The arena stores facts behind
//! stable `FactId` indices so the links are plain indices and equality stays
//! trivially independent of them: memo tables key on [`FactKey`], which covers
//! the access path and activation-relevant flags only.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::program::NodeId;
use crate::taint::access_path::AccessPath;

/// Stable index of a fact in a [`FactArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FactId(pub u32);

/// The immutable core of a taint fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fact {
    pub access_path: AccessPath,
    /// Whether the taint is live. Inactive facts are alias queries that only
    /// become taints once they pass their activation statement.
    pub active: bool,
    pub activation_stmt: Option<NodeId>,
    /// Set while the taint rides an exception being unwound.
    pub exception_thrown: bool,
    /// Scope bound of a control taint: the taint dies at this node.
    pub dominator: Option<NodeId>,
    /// Statement that introduced the taint, for result reporting.
    pub source_stmt: Option<NodeId>,
    /// Length of the predecessor chain, bounded by configuration.
    pub path_length: u32,
    /// True only for the arena's tautology fact.
    pub zero: bool,
}

impl Fact {
    /// Identity for memo tables. Witness bookkeeping (predecessor, neighbors,
    /// source statement) must never influence deduplication.
    pub fn key(&self) -> FactKey {
        FactKey {
            access_path: self.access_path.clone(),
            active: self.active,
            activation_stmt: self.activation_stmt,
            exception_thrown: self.exception_thrown,
            dominator: self.dominator,
            zero: self.zero,
        }
    }

    /// A control taint: empty access path, not an exception carrier.
    pub fn is_control(&self) -> bool {
        !self.zero && self.access_path.is_empty() && !self.exception_thrown
    }
}

/// Memo-table identity of a fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FactKey {
    pub access_path: AccessPath,
    pub active: bool,
    pub activation_stmt: Option<NodeId>,
    pub exception_thrown: bool,
    pub dominator: Option<NodeId>,
    pub zero: bool,
}

#[derive(Debug)]
struct FactRecord {
    core: Arc<Fact>,
    predecessor: Option<FactId>,
    neighbors: Vec<FactId>,
}

/// Concurrent arena of facts. Shared between the solver, the rules, and the
/// result sink via the analysis context.
#[derive(Debug)]
pub struct FactArena {
    records: DashMap<FactId, FactRecord>,
    next: AtomicU32,
    zero: FactId,
}

impl Default for FactArena {
    fn default() -> Self {
        Self::new()
    }
}

impl FactArena {
    pub fn new() -> Self {
        let arena = Self {
            records: DashMap::new(),
            next: AtomicU32::new(0),
            zero: FactId(0),
        };
        let zero = arena.alloc(
            Fact {
                access_path: AccessPath::empty(),
                active: true,
                activation_stmt: None,
                exception_thrown: false,
                dominator: None,
                source_stmt: None,
                path_length: 0,
                zero: true,
            },
            None,
        );
        debug_assert_eq!(zero, FactId(0));
        arena
    }

    /// The tautology fact seeded at entry points. It holds everywhere and is
    /// the context from which source rules create real taints.
    pub fn zero(&self) -> FactId {
        self.zero
    }

    pub fn is_zero(&self, id: FactId) -> bool {
        id == self.zero
    }

    pub fn alloc(&self, fact: Fact, predecessor: Option<FactId>) -> FactId {
        let id = FactId(self.next.fetch_add(1, Ordering::Relaxed));
        self.records.insert(
            id,
            FactRecord {
                core: Arc::new(fact),
                predecessor,
                neighbors: Vec::new(),
            },
        );
        id
    }

    pub fn get(&self, id: FactId) -> Arc<Fact> {
        self.records
            .get(&id)
            .map(|r| Arc::clone(&r.core))
            .expect("fact id not present in arena")
    }

    pub fn key(&self, id: FactId) -> FactKey {
        self.get(id).key()
    }

    pub fn predecessor(&self, id: FactId) -> Option<FactId> {
        self.records.get(&id).and_then(|r| r.predecessor)
    }

    pub fn neighbors(&self, id: FactId) -> Vec<FactId> {
        self.records
            .get(&id)
            .map(|r| r.neighbors.clone())
            .unwrap_or_default()
    }

    pub fn neighbor_count(&self, id: FactId) -> usize {
        self.records.get(&id).map(|r| r.neighbors.len()).unwrap_or(0)
    }

    /// Derives a new fact from an existing one: clones the core, applies the
    /// edit, links the predecessor, and extends the path length.
    pub fn derive<F>(&self, from: FactId, edit: F) -> FactId
    where
        F: FnOnce(&mut Fact),
    {
        let base = self.get(from);
        let mut fact = (*base).clone();
        fact.zero = false;
        fact.path_length = base.path_length.saturating_add(1);
        edit(&mut fact);
        self.alloc(fact, Some(from))
    }

    /// Clone of a fact with a different predecessor; used by the
    /// predecessor-shortening policy at summary joins.
    pub fn with_predecessor(&self, id: FactId, predecessor: FactId) -> FactId {
        let core = (*self.get(id)).clone();
        self.alloc(core, Some(predecessor))
    }

    /// Merges `neighbor` into the stored fact at a join point. Returns false
    /// when the neighbor cap rejected the merge. Join points at call sites
    /// are essential and bypass the cap.
    pub fn add_neighbor(
        &self,
        id: FactId,
        neighbor: FactId,
        max_join_point_abstractions: i64,
        essential: bool,
    ) -> bool {
        if id == neighbor {
            return false;
        }
        let mut record = match self.records.get_mut(&id) {
            Some(r) => r,
            None => return false,
        };
        if record.neighbors.contains(&neighbor) {
            return false;
        }
        if !essential
            && max_join_point_abstractions >= 0
            && record.neighbors.len() as i64 >= max_join_point_abstractions
        {
            return false;
        }
        record.neighbors.push(neighbor);
        true
    }

    /// Structural equality on memo-table identity, for the if-equal
    /// predecessor-shortening mode.
    pub fn structurally_equal(&self, a: FactId, b: FactId) -> bool {
        a == b || self.key(a) == self.key(b)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
