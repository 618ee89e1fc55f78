// Export modules for library usage
pub mod config;
pub mod context;
pub mod errors;
pub mod program;
pub mod rules;
pub mod solver;
pub mod taint;

// Re-export commonly used types
pub use crate::config::{
    GcTrigger, ImplicitFlowMode, PredecessorShorteningMode, TaintConfig,
};

pub use crate::context::AnalysisContext;

pub use crate::errors::{Result, TaintError};

pub use crate::program::{
    CallExpr, FieldId, InterproceduralCfg, LValue, LocalId, NodeId, ProcId, ProgramBuilder,
    ProgramGraph, Rvalue, Stmt, TypeId, Value,
};

pub use crate::rules::{PropagationRule, RuleManager, RuleOutput};

pub use crate::solver::{
    GarbageCollector, GcPeerGroup, SolverState, TabulationSolver, TerminationReason,
};

pub use crate::taint::{
    AccessPath, ArrayTaintType, Fact, FactArena, FactId, FactKey, FlowDescriptor, FlowReport,
    FlowReportEntry, MapTaintWrapper, SimpleSourceSinkProvider, SinkInfo, SourceInfo,
    SourceSinkOracle, TaintFlow, TaintResults, TaintWrapper, WrapperModel,
};
