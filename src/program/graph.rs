//! In-memory program model and its builder.
//!
//! `ProgramGraph` is the crate's reference implementation of
//! [`InterproceduralCfg`]: statements are stored in flat vectors indexed by
//! node id, and all derived views (return sites, caller index, transitive
//! static-field reads, immediate post-dominators) are computed once when the
//! builder is finalized, so every trait query is a plain slice lookup.

use std::collections::{HashMap, HashSet};

use petgraph::algo::dominators;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::program::icfg::InterproceduralCfg;
use crate::program::stmt::{FieldId, LocalId, NodeId, ProcId, Rvalue, Stmt, TypeId, TypeTable, Value};

#[derive(Debug, Clone, Default)]
struct ProcData {
    name: String,
    is_system: bool,
    entry_points: Vec<NodeId>,
    exit_points: Vec<NodeId>,
    call_sites: Vec<NodeId>,
    params: Vec<LocalId>,
    receiver: Option<LocalId>,
    nodes: Vec<NodeId>,
}

/// Finalized, read-only program model. Shared between solver instances via
/// `Arc`; holds no interior mutability.
#[derive(Debug)]
pub struct ProgramGraph {
    stmts: Vec<Stmt>,
    succs: Vec<Vec<NodeId>>,
    preds: Vec<Vec<NodeId>>,
    node_proc: Vec<ProcId>,
    procs: Vec<ProcData>,
    callees: Vec<Vec<ProcId>>,
    callers: Vec<Vec<NodeId>>,
    exceptional: HashSet<(NodeId, NodeId)>,
    ipdom: HashMap<NodeId, NodeId>,
    types: TypeTable,
    local_types: Vec<TypeId>,
    field_types: Vec<TypeId>,
    static_reads: Vec<HashSet<FieldId>>,
    entry_procs: Vec<ProcId>,
    empty_nodes: Vec<NodeId>,
}

impl ProgramGraph {
    pub fn proc_name(&self, p: ProcId) -> &str {
        &self.procs[p.0 as usize].name
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    pub fn local_type(&self, l: LocalId) -> TypeId {
        self.local_types[l.0 as usize]
    }

    pub fn field_type(&self, f: FieldId) -> TypeId {
        self.field_types[f.0 as usize]
    }

    /// Declared type of a value, if it has one. Constants carry no taintable
    /// type.
    pub fn value_type(&self, v: Value) -> Option<TypeId> {
        match v {
            Value::Local(l) => Some(self.local_type(l)),
            Value::StaticField(f) => Some(self.field_type(f)),
            Value::Const => None,
        }
    }

    /// Procedures designated as analysis entry points.
    pub fn entry_procs(&self) -> &[ProcId] {
        &self.entry_procs
    }

    pub fn params_of(&self, p: ProcId) -> &[LocalId] {
        &self.procs[p.0 as usize].params
    }

    pub fn receiver_of(&self, p: ProcId) -> Option<LocalId> {
        self.procs[p.0 as usize].receiver
    }

    /// Direct callees of all call sites within a procedure. Drives the
    /// garbage collector's reference-set computation.
    pub fn callees_in(&self, p: ProcId) -> Vec<ProcId> {
        let mut out = Vec::new();
        for &site in &self.procs[p.0 as usize].call_sites {
            out.extend(self.callees[site.0 as usize].iter().copied());
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    pub fn node_count(&self) -> usize {
        self.stmts.len()
    }
}

impl InterproceduralCfg for ProgramGraph {
    fn succs_of(&self, n: NodeId) -> &[NodeId] {
        &self.succs[n.0 as usize]
    }

    fn preds_of(&self, n: NodeId) -> &[NodeId] {
        &self.preds[n.0 as usize]
    }

    fn proc_of(&self, n: NodeId) -> ProcId {
        self.node_proc[n.0 as usize]
    }

    fn entry_points_of(&self, p: ProcId) -> &[NodeId] {
        &self.procs[p.0 as usize].entry_points
    }

    fn exit_points_of(&self, p: ProcId) -> &[NodeId] {
        &self.procs[p.0 as usize].exit_points
    }

    fn is_call(&self, n: NodeId) -> bool {
        self.stmts[n.0 as usize].is_call()
    }

    fn is_exit(&self, n: NodeId) -> bool {
        self.procs[self.proc_of(n).0 as usize]
            .exit_points
            .contains(&n)
    }

    fn callees_of(&self, n: NodeId) -> &[ProcId] {
        &self.callees[n.0 as usize]
    }

    fn return_sites_of(&self, call: NodeId) -> &[NodeId] {
        // Return sites are exactly the intraprocedural successors of a call.
        if self.is_call(call) {
            &self.succs[call.0 as usize]
        } else {
            &self.empty_nodes
        }
    }

    fn callers_of(&self, p: ProcId) -> &[NodeId] {
        &self.callers[p.0 as usize]
    }

    fn call_sites_in(&self, p: ProcId) -> &[NodeId] {
        &self.procs[p.0 as usize].call_sites
    }

    fn is_exceptional_edge(&self, from: NodeId, to: NodeId) -> bool {
        self.exceptional.contains(&(from, to))
    }

    fn immediate_postdominator(&self, n: NodeId) -> Option<NodeId> {
        self.ipdom.get(&n).copied()
    }

    fn stmt(&self, n: NodeId) -> &Stmt {
        &self.stmts[n.0 as usize]
    }

    fn is_system_proc(&self, p: ProcId) -> bool {
        self.procs[p.0 as usize].is_system
    }

    fn reads_static_field(&self, p: ProcId, field: FieldId) -> bool {
        self.static_reads[p.0 as usize].contains(&field)
    }

    fn proc_count(&self) -> usize {
        self.procs.len()
    }
}

/// Builder for [`ProgramGraph`]. Statements are appended per procedure and
/// wired with explicit edges; `finalize` computes all derived indices.
#[derive(Debug)]
pub struct ProgramBuilder {
    stmts: Vec<Stmt>,
    succs: Vec<Vec<NodeId>>,
    preds: Vec<Vec<NodeId>>,
    node_proc: Vec<ProcId>,
    procs: Vec<ProcData>,
    callees: Vec<Vec<ProcId>>,
    exceptional: HashSet<(NodeId, NodeId)>,
    types: TypeTable,
    default_type: TypeId,
    local_types: Vec<TypeId>,
    field_types: Vec<TypeId>,
    entry_procs: Vec<ProcId>,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    pub fn new() -> Self {
        let mut types = TypeTable::new();
        let default_type = types.add_type("Object");
        Self {
            stmts: Vec::new(),
            succs: Vec::new(),
            preds: Vec::new(),
            node_proc: Vec::new(),
            procs: Vec::new(),
            callees: Vec::new(),
            exceptional: HashSet::new(),
            types,
            default_type,
            local_types: Vec::new(),
            field_types: Vec::new(),
            entry_procs: Vec::new(),
        }
    }

    /// The root type every other type is a subtype of.
    pub fn object_type(&self) -> TypeId {
        self.default_type
    }

    pub fn add_type(&mut self, name: impl Into<String>) -> TypeId {
        let t = self.types.add_type(name);
        self.types.add_subtype(t, self.default_type);
        t
    }

    pub fn add_subtype(&mut self, sub: TypeId, sup: TypeId) {
        self.types.add_subtype(sub, sup);
    }

    pub fn add_proc(&mut self, name: impl Into<String>) -> ProcId {
        let id = ProcId(self.procs.len() as u32);
        self.procs.push(ProcData {
            name: name.into(),
            ..ProcData::default()
        });
        id
    }

    /// Marks a procedure as a well-known system procedure that the skip rule
    /// may elide.
    pub fn mark_system(&mut self, p: ProcId) {
        self.procs[p.0 as usize].is_system = true;
    }

    /// Marks a procedure as an analysis entry point; the solver seeds the
    /// zero fact at its entry node.
    pub fn mark_entry_proc(&mut self, p: ProcId) {
        if !self.entry_procs.contains(&p) {
            self.entry_procs.push(p);
        }
    }

    pub fn add_local(&mut self, _p: ProcId, ty: Option<TypeId>) -> LocalId {
        let id = LocalId(self.local_types.len() as u32);
        self.local_types.push(ty.unwrap_or(self.default_type));
        id
    }

    pub fn add_field(&mut self, ty: Option<TypeId>) -> FieldId {
        let id = FieldId(self.field_types.len() as u32);
        self.field_types.push(ty.unwrap_or(self.default_type));
        id
    }

    pub fn set_params(&mut self, p: ProcId, params: Vec<LocalId>) {
        self.procs[p.0 as usize].params = params;
    }

    pub fn set_receiver(&mut self, p: ProcId, receiver: LocalId) {
        self.procs[p.0 as usize].receiver = Some(receiver);
    }

    /// Appends a statement to a procedure. The first statement added to a
    /// procedure becomes its entry point. No edges are added implicitly.
    pub fn add_stmt(&mut self, p: ProcId, stmt: Stmt) -> NodeId {
        let id = NodeId(self.stmts.len() as u32);
        self.stmts.push(stmt);
        self.succs.push(Vec::new());
        self.preds.push(Vec::new());
        self.callees.push(Vec::new());
        self.node_proc.push(p);
        let proc = &mut self.procs[p.0 as usize];
        if proc.nodes.is_empty() {
            proc.entry_points.push(id);
        }
        proc.nodes.push(id);
        id
    }

    /// Appends statements and wires them sequentially.
    pub fn add_stmt_seq(&mut self, p: ProcId, stmts: Vec<Stmt>) -> Vec<NodeId> {
        let nodes: Vec<NodeId> = stmts.into_iter().map(|s| self.add_stmt(p, s)).collect();
        for pair in nodes.windows(2) {
            self.add_edge(pair[0], pair[1]);
        }
        nodes
    }

    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        if !self.succs[from.0 as usize].contains(&to) {
            self.succs[from.0 as usize].push(to);
            self.preds[to.0 as usize].push(from);
        }
    }

    pub fn add_exceptional_edge(&mut self, from: NodeId, to: NodeId) {
        self.add_edge(from, to);
        self.exceptional.insert((from, to));
    }

    pub fn add_call_target(&mut self, call: NodeId, callee: ProcId) {
        debug_assert!(self.stmts[call.0 as usize].is_call());
        if !self.callees[call.0 as usize].contains(&callee) {
            self.callees[call.0 as usize].push(callee);
        }
    }

    pub fn finalize(mut self) -> ProgramGraph {
        self.compute_exit_points();
        let callers = self.compute_callers();
        let ipdom = self.compute_postdominators();
        let static_reads = self.compute_static_reads();

        for proc in &mut self.procs {
            proc.call_sites = proc
                .nodes
                .iter()
                .copied()
                .filter(|n| self.stmts[n.0 as usize].is_call())
                .collect();
        }

        ProgramGraph {
            stmts: self.stmts,
            succs: self.succs,
            preds: self.preds,
            node_proc: self.node_proc,
            procs: self.procs,
            callees: self.callees,
            callers,
            exceptional: self.exceptional,
            ipdom,
            types: self.types,
            local_types: self.local_types,
            field_types: self.field_types,
            static_reads,
            entry_procs: self.entry_procs,
            empty_nodes: Vec::new(),
        }
    }

    fn compute_exit_points(&mut self) {
        for proc in &mut self.procs {
            proc.exit_points = proc
                .nodes
                .iter()
                .copied()
                .filter(|n| {
                    let idx = n.0 as usize;
                    matches!(self.stmts[idx], Stmt::Return(_)) || self.succs[idx].is_empty()
                })
                .collect();
        }
    }

    fn compute_callers(&self) -> Vec<Vec<NodeId>> {
        let mut callers = vec![Vec::new(); self.procs.len()];
        for (idx, targets) in self.callees.iter().enumerate() {
            for callee in targets {
                callers[callee.0 as usize].push(NodeId(idx as u32));
            }
        }
        callers
    }

    /// Immediate post-dominators per procedure: dominators of the reversed
    /// CFG rooted at a virtual exit joining all exit points.
    fn compute_postdominators(&self) -> HashMap<NodeId, NodeId> {
        let mut ipdom = HashMap::new();
        for proc in &self.procs {
            if proc.nodes.is_empty() {
                continue;
            }
            let mut graph: DiGraph<Option<NodeId>, ()> = DiGraph::new();
            let mut index_of: HashMap<NodeId, NodeIndex> = HashMap::new();
            for &n in &proc.nodes {
                index_of.insert(n, graph.add_node(Some(n)));
            }
            let virtual_exit = graph.add_node(None);
            // Reversed edges: post-dominance is dominance over reversed flow.
            for &n in &proc.nodes {
                for &s in &self.succs[n.0 as usize] {
                    if self.node_proc[s.0 as usize] == self.node_proc[n.0 as usize] {
                        graph.add_edge(index_of[&s], index_of[&n], ());
                    }
                }
            }
            for &e in &proc.exit_points {
                graph.add_edge(virtual_exit, index_of[&e], ());
            }
            let doms = dominators::simple_fast(&graph, virtual_exit);
            for &n in &proc.nodes {
                if let Some(idom) = doms.immediate_dominator(index_of[&n]) {
                    if let Some(target) = graph[idom] {
                        ipdom.insert(n, target);
                    }
                }
            }
        }
        ipdom
    }

    /// Transitive closure of "procedure reads static field" over the call
    /// graph, by worklist until fixpoint.
    fn compute_static_reads(&self) -> Vec<HashSet<FieldId>> {
        let mut reads: Vec<HashSet<FieldId>> = vec![HashSet::new(); self.procs.len()];
        for (idx, stmt) in self.stmts.iter().enumerate() {
            let p = self.node_proc[idx].0 as usize;
            for v in stmt.used_values() {
                if let Value::StaticField(f) = v {
                    reads[p].insert(f);
                }
            }
            if let Stmt::Assign {
                rhs: Rvalue::Use(Value::StaticField(f)),
                ..
            } = stmt
            {
                reads[p].insert(*f);
            }
        }

        // Caller inherits callee reads.
        let mut changed = true;
        while changed {
            changed = false;
            for (idx, targets) in self.callees.iter().enumerate() {
                let caller = self.node_proc[idx].0 as usize;
                for callee in targets {
                    let callee_reads: Vec<FieldId> =
                        reads[callee.0 as usize].iter().copied().collect();
                    for f in callee_reads {
                        if reads[caller].insert(f) {
                            changed = true;
                        }
                    }
                }
            }
        }
        reads
    }
}
