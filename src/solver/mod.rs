//! Concurrent tabulation solver, its memo tables, and the garbage collector
//! that reclaims them.

mod executor;
mod gc;
mod memo;
mod path_edge;
mod tabulation;

pub use gc::{
    EagerReferenceProvider, GarbageCollector, GcPeerGroup, LazyReferenceProvider, RefCountGc,
    ReferenceProvider, SweeperHandle,
};
pub use memo::{EndSummaries, IncomingRecord, IncomingTable, JumpFunctions, SummaryEntry};
pub use path_edge::{EdgeKey, PathEdge};
pub use tabulation::{SolverState, TabulationSolver, TerminationReason};
