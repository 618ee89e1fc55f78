//! Program model: statement IR, interprocedural CFG interface, and the
//! in-memory graph implementation embedders build against.

mod graph;
mod icfg;
mod stmt;

pub use graph::{ProgramBuilder, ProgramGraph};
pub use icfg::InterproceduralCfg;
pub use stmt::{
    CallExpr, FieldId, LValue, LocalId, NodeId, ProcId, Rvalue, Stmt, TypeId, TypeTable, Value,
};
