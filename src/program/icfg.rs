//! Interprocedural control-flow graph interface.
//!
//! This is the boundary between the solver and whatever produced the program:
//! everything the tabulation solver, the rules, and the garbage collector know
//! about control flow goes through this trait. The crate ships one
//! implementation, [`crate::program::ProgramGraph`]; embedders with their own
//! program representation can provide another.

use crate::program::stmt::{FieldId, NodeId, ProcId, Stmt};

pub trait InterproceduralCfg: Send + Sync {
    /// Control-flow successors of a node, exceptional edges included.
    fn succs_of(&self, n: NodeId) -> &[NodeId];

    fn preds_of(&self, n: NodeId) -> &[NodeId];

    /// The procedure containing a node.
    fn proc_of(&self, n: NodeId) -> ProcId;

    fn entry_points_of(&self, p: ProcId) -> &[NodeId];

    fn exit_points_of(&self, p: ProcId) -> &[NodeId];

    fn is_call(&self, n: NodeId) -> bool;

    /// Whether the node ends its procedure. Note that a `throw` can be both
    /// an exit and an ordinary statement with successors.
    fn is_exit(&self, n: NodeId) -> bool;

    /// Resolved callees of a call site. Empty for unresolved calls.
    fn callees_of(&self, n: NodeId) -> &[ProcId];

    /// Statements control returns to after the call completes, exceptional
    /// return sites included.
    fn return_sites_of(&self, call: NodeId) -> &[NodeId];

    /// All call sites that may invoke the given procedure.
    fn callers_of(&self, p: ProcId) -> &[NodeId];

    /// All call sites contained in the given procedure.
    fn call_sites_in(&self, p: ProcId) -> &[NodeId];

    /// Whether the edge `from -> to` is only taken when an exception is in
    /// flight.
    fn is_exceptional_edge(&self, from: NodeId, to: NodeId) -> bool;

    /// Immediate post-dominator of a node, if it has one. Used to bound the
    /// scope of control taints.
    fn immediate_postdominator(&self, n: NodeId) -> Option<NodeId>;

    fn stmt(&self, n: NodeId) -> &Stmt;

    /// Well-known side-effect-free bootstrap procedures that the skip rule
    /// elides from call processing.
    fn is_system_proc(&self, p: ProcId) -> bool;

    /// Whether the procedure, or anything it transitively calls, reads the
    /// given static field.
    fn reads_static_field(&self, p: ProcId, field: FieldId) -> bool;

    fn proc_count(&self) -> usize;
}
