//! Path edges, the solver's unit of work.

use crate::program::NodeId;
use crate::taint::{FactArena, FactId, FactKey};

/// "If `d1` holds at the entry of the procedure containing `node`, `d2`
/// holds at `node`." Carries arena indices; identity for the memo tables is
/// the structural [`EdgeKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathEdge {
    pub d1: FactId,
    pub node: NodeId,
    pub d2: FactId,
}

impl PathEdge {
    pub fn new(d1: FactId, node: NodeId, d2: FactId) -> Self {
        Self { d1, node, d2 }
    }

    pub fn key(&self, arena: &FactArena) -> EdgeKey {
        EdgeKey {
            d1: arena.key(self.d1),
            node: self.node,
            d2: arena.key(self.d2),
        }
    }
}

/// Structural identity of a path edge. Two edges with distinct witness
/// bookkeeping but equal keys are the same unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub d1: FactKey,
    pub node: NodeId,
    pub d2: FactKey,
}
