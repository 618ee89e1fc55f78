//! Source/sink oracle: where taints are born and where they must be reported.

use std::collections::HashMap;
use std::sync::Arc;

use crate::program::{InterproceduralCfg, LValue, NodeId, Stmt, Value};
use crate::taint::access_path::AccessPath;

/// Descriptor of a declared source or sink, carried through to results.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowDescriptor {
    pub name: String,
}

impl FlowDescriptor {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { name: name.into() })
    }
}

/// Answer for a source query: the descriptor plus the access paths to seed.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub descriptor: Arc<FlowDescriptor>,
    pub access_paths: Vec<AccessPath>,
}

/// Answer for a sink query.
#[derive(Debug, Clone)]
pub struct SinkInfo {
    pub descriptor: Arc<FlowDescriptor>,
}

/// Per-statement oracle consulted by the source and sink rules.
pub trait SourceSinkOracle: Send + Sync {
    /// If the statement is a declared source, the access paths it taints.
    fn source_info(&self, stmt: NodeId, icfg: &dyn InterproceduralCfg) -> Option<SourceInfo>;

    /// If the statement is a declared sink for the given access path, its
    /// descriptor. The rule engine has already checked that the access path
    /// is referenced by the statement.
    fn sink_info(
        &self,
        stmt: NodeId,
        access_path: &AccessPath,
        icfg: &dyn InterproceduralCfg,
    ) -> Option<SinkInfo>;
}

/// Declarative oracle: statements are marked as sources or sinks by node id.
/// Sources taint the value the statement defines (call result or assignment
/// target).
#[derive(Debug, Default)]
pub struct SimpleSourceSinkProvider {
    sources: HashMap<NodeId, Arc<FlowDescriptor>>,
    sinks: HashMap<NodeId, Arc<FlowDescriptor>>,
}

impl SimpleSourceSinkProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_source(&mut self, stmt: NodeId, name: impl Into<String>) {
        self.sources.insert(stmt, FlowDescriptor::new(name));
    }

    pub fn mark_sink(&mut self, stmt: NodeId, name: impl Into<String>) {
        self.sinks.insert(stmt, FlowDescriptor::new(name));
    }

    fn defined_value(stmt: &Stmt) -> Option<Value> {
        match stmt {
            Stmt::Call(call) => call.result.map(Value::Local),
            Stmt::Assign {
                lhs: LValue::Local(l),
                ..
            } => Some(Value::Local(*l)),
            Stmt::Assign {
                lhs: LValue::StaticField(f),
                ..
            } => Some(Value::StaticField(*f)),
            _ => None,
        }
    }
}

impl SourceSinkOracle for SimpleSourceSinkProvider {
    fn source_info(&self, stmt: NodeId, icfg: &dyn InterproceduralCfg) -> Option<SourceInfo> {
        let descriptor = self.sources.get(&stmt)?;
        let value = Self::defined_value(icfg.stmt(stmt))?;
        Some(SourceInfo {
            descriptor: Arc::clone(descriptor),
            access_paths: vec![AccessPath::for_value(value)],
        })
    }

    fn sink_info(
        &self,
        stmt: NodeId,
        _access_path: &AccessPath,
        _icfg: &dyn InterproceduralCfg,
    ) -> Option<SinkInfo> {
        self.sinks.get(&stmt).map(|descriptor| SinkInfo {
            descriptor: Arc::clone(descriptor),
        })
    }
}
